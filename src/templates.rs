//! Filtering and sorting of the event template table.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::model::EventTemplate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    Name,
    Description,
    Provider,
    Type,
}

impl FromStr for SortColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "name" => Ok(Self::Name),
            "description" => Ok(Self::Description),
            "provider" => Ok(Self::Provider),
            "type" => Ok(Self::Type),
            other => Err(format!("unknown column '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    fn flip(self) -> Self {
        match self {
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ascending => "asc",
            Self::Descending => "desc",
        })
    }
}

/// A text filter plus an optional sort. Unsorted rows keep the server's
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateQuery {
    filter: String,
    column: Option<SortColumn>,
    direction: SortDirection,
}

impl TemplateQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn sort(&self) -> Option<(SortColumn, SortDirection)> {
        self.column.map(|column| (column, self.direction))
    }

    pub fn set_filter(&mut self, filter: impl Into<String>) {
        self.filter = filter.into();
    }

    pub fn set_sort(&mut self, column: SortColumn, direction: SortDirection) {
        self.column = Some(column);
        self.direction = direction;
    }

    pub fn clear_sort(&mut self) {
        self.column = None;
        self.direction = SortDirection::Ascending;
    }

    /// Clicking a column header: the same column flips direction, a new
    /// column sorts ascending.
    pub fn toggle_sort(&mut self, column: SortColumn) {
        if self.column == Some(column) {
            self.direction = self.direction.flip();
        } else {
            self.column = Some(column);
            self.direction = SortDirection::Ascending;
        }
    }

    /// Case-insensitive substring match on name, description or provider.
    pub fn matches(&self, template: &EventTemplate) -> bool {
        let needle = self.filter.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        [
            template.name.as_str(),
            template.description.as_str(),
            template.provider.as_str(),
        ]
        .iter()
        .any(|field| field.to_lowercase().contains(&needle))
    }

    /// The visible rows, filtered then sorted.
    pub fn apply(&self, templates: &[EventTemplate]) -> Vec<EventTemplate> {
        let mut rows: Vec<EventTemplate> = templates.iter().filter(|t| self.matches(t)).cloned().collect();
        let Some(column) = self.column else {
            return rows;
        };
        rows.sort_by(|a, b| {
            let ord = compare(column, a, b);
            match self.direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            }
        });
        rows
    }

}

fn compare(column: SortColumn, a: &EventTemplate, b: &EventTemplate) -> Ordering {
    match column {
        SortColumn::Name => a.name.cmp(&b.name),
        SortColumn::Description => a.description.cmp(&b.description),
        SortColumn::Provider => a.provider.cmp(&b.provider),
        SortColumn::Type => a.template_type.as_str().cmp(b.template_type.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TemplateType;

    fn template(name: &str, description: &str) -> EventTemplate {
        EventTemplate {
            name: name.into(),
            description: description.into(),
            provider: "Oracle".into(),
            template_type: TemplateType::Target,
        }
    }

    fn names(rows: &[EventTemplate]) -> Vec<&str> {
        rows.iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn filter_is_case_insensitive() {
        let rows = vec![template("Alpha", "first"), template("beta", "second")];
        let mut q = TemplateQuery::new();
        q.set_filter(" AL ");
        assert_eq!(names(&q.apply(&rows)), vec!["Alpha"]);
    }

    #[test]
    fn filter_checks_description() {
        let rows = vec![template("Alpha", "first"), template("Beta", "Low overhead")];
        let mut q = TemplateQuery::new();
        q.set_filter("overhead");
        assert_eq!(names(&q.apply(&rows)), vec!["Beta"]);
    }

    #[test]
    fn unsorted_keeps_server_order() {
        let rows = vec![template("b", ""), template("c", ""), template("a", "")];
        let q = TemplateQuery::new();
        assert_eq!(q.sort(), None);
        assert_eq!(names(&q.apply(&rows)), vec!["b", "c", "a"]);
    }

    #[test]
    fn toggle_sort_flips_direction() {
        let rows = vec![template("b", ""), template("a", "")];
        let mut q = TemplateQuery::new();
        q.toggle_sort(SortColumn::Name);
        assert_eq!(names(&q.apply(&rows)), vec!["a", "b"]);
        q.toggle_sort(SortColumn::Name);
        assert_eq!(names(&q.apply(&rows)), vec!["b", "a"]);
        q.toggle_sort(SortColumn::Description);
        assert_eq!(q.sort(), Some((SortColumn::Description, SortDirection::Ascending)));
        q.clear_sort();
        assert_eq!(names(&q.apply(&rows)), vec!["b", "a"]);
    }

    #[test]
    fn column_parse() {
        assert_eq!("Provider".parse::<SortColumn>(), Ok(SortColumn::Provider));
        assert!("size".parse::<SortColumn>().is_err());
    }
}
