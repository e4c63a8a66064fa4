use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Logical tables shared by the local mirror and the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableName {
    Subscribers,
    Groups,
    GroupItems,
    CoursePoints,
    DietItems,
    Products,
    Sales,
    SaleItems,
}

impl TableName {
    /// Every table, parents before children.
    pub const ALL: [TableName; 8] = [
        TableName::Subscribers,
        TableName::Groups,
        TableName::GroupItems,
        TableName::CoursePoints,
        TableName::DietItems,
        TableName::Products,
        TableName::Sales,
        TableName::SaleItems,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TableName::Subscribers => "subscribers",
            TableName::Groups => "groups",
            TableName::GroupItems => "group_items",
            TableName::CoursePoints => "course_points",
            TableName::DietItems => "diet_items",
            TableName::Products => "products",
            TableName::Sales => "sales",
            TableName::SaleItems => "sale_items",
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableName {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        TableName::ALL
            .iter()
            .copied()
            .find(|table| table.as_str() == value)
            .ok_or_else(|| format!("Unknown table: {}", value))
    }
}
