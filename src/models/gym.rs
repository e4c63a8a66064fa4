//! Gym catalog records. The sync layer treats them as opaque JSON; these
//! types exist for the domain helpers in `services::records`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::tables::TableName;

/// A record that lives in one of the mirrored tables.
pub trait GymRecord: Serialize + DeserializeOwned + Send + Sync {
    const TABLE: TableName;

    fn record_id(&self) -> &str;
    fn set_record_id(&mut self, id: String);
}

macro_rules! gym_record {
    ($ty:ty, $table:expr) => {
        impl GymRecord for $ty {
            const TABLE: TableName = $table;

            fn record_id(&self) -> &str {
                &self.id
            }

            fn set_record_id(&mut self, id: String) {
                self.id = id;
            }
        }
    };
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Subscriber {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub birth_date: Option<String>,
    pub training_group_id: Option<String>,
    pub diet_group_id: Option<String>,
    pub subscription_start: Option<String>,
    pub subscription_end: Option<String>,
    pub notes: Option<String>,
}

/// A training program or diet plan grouping catalog items.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Group {
    pub id: String,
    pub name: String,
    /// "training" or "diet"
    pub kind: String,
    pub description: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct GroupItem {
    pub id: String,
    pub group_id: String,
    pub course_point_id: Option<String>,
    pub diet_item_id: Option<String>,
    pub position: i64,
    pub sets: Option<i64>,
    pub repetitions: Option<i64>,
    pub note: Option<String>,
}

/// A training exercise in the course catalog.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct CoursePoint {
    pub id: String,
    pub name: String,
    pub muscle_group: Option<String>,
    pub description: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct DietItem {
    pub id: String,
    pub name: String,
    pub meal: Option<String>,
    pub calories: Option<f64>,
    pub description: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub category: Option<String>,
    pub price: f64,
    pub stock: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Sale {
    pub id: String,
    pub subscriber_id: Option<String>,
    pub total: f64,
    pub sold_at: String,
    pub payment_method: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct SaleItem {
    pub id: String,
    pub sale_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub unit_price: f64,
}

gym_record!(Subscriber, TableName::Subscribers);
gym_record!(Group, TableName::Groups);
gym_record!(GroupItem, TableName::GroupItems);
gym_record!(CoursePoint, TableName::CoursePoints);
gym_record!(DietItem, TableName::DietItems);
gym_record!(Product, TableName::Products);
gym_record!(Sale, TableName::Sales);
gym_record!(SaleItem, TableName::SaleItems);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn remote_rows_with_extra_columns_decode() {
        let row = json!({
            "id": "p1",
            "name": "Whey 1kg",
            "price": 39.5,
            "stock": 12,
            "created_at": "2024-02-01T10:00:00Z"
        });
        let product: Product = serde_json::from_value(row).unwrap();
        assert_eq!(product.record_id(), "p1");
        assert_eq!(product.stock, 12);
        assert_eq!(product.category, None);
    }

    #[test]
    fn records_know_their_table() {
        assert_eq!(Subscriber::TABLE, TableName::Subscribers);
        assert_eq!(SaleItem::TABLE, TableName::SaleItems);
    }
}
