//! Ordering and paging clauses.

use tsqlmodel_core::AttributeRef;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub attribute: AttributeRef,
    pub direction: OrderDirection,
}

impl OrderBy {
    pub fn asc(attribute: impl Into<AttributeRef>) -> Self {
        Self {
            attribute: attribute.into(),
            direction: OrderDirection::Asc,
        }
    }

    pub fn desc(attribute: impl Into<AttributeRef>) -> Self {
        Self {
            attribute: attribute.into(),
            direction: OrderDirection::Desc,
        }
    }

    /// Render against an already qualified column. Ascending order carries
    /// no keyword.
    pub(crate) fn render(&self, column: &str) -> String {
        match self.direction {
            OrderDirection::Asc => column.to_string(),
            OrderDirection::Desc => format!("{} DESC", column),
        }
    }
}

/// A page of results: `size` rows, 1-based `number`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub size: u32,
    pub number: u32,
}

impl Page {
    pub const fn new(size: u32, number: u32) -> Self {
        Self { size, number }
    }

    /// Rows skipped before this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.number.saturating_sub(1)) * u64::from(self.size)
    }

    /// The following page of the same size.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self {
            size: self.size,
            number: self.number.saturating_add(1),
        }
    }

    pub const fn is_valid(&self) -> bool {
        self.size > 0 && self.number > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_renders_direction() {
        assert_eq!(OrderBy::asc("Name").render("[Name]"), "[Name]");
        assert_eq!(OrderBy::desc("Name").render("[Name]"), "[Name] DESC");
    }

    #[test]
    fn page_offsets() {
        assert_eq!(Page::new(3, 1).offset(), 0);
        assert_eq!(Page::new(3, 2).offset(), 3);
        assert_eq!(Page::new(25, 4).offset(), 75);
        assert_eq!(Page::new(3, 1).next(), Page::new(3, 2));
        assert!(!Page::new(0, 1).is_valid());
        assert!(!Page::new(10, 0).is_valid());
    }
}
