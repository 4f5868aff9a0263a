use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize, Serializer};
use std::str::FromStr;

use crate::money::from_minor_units;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Vegetables,
    Fruits,
    Grains,
    Tools,
    Supplies,
    Specialty,
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vegetables" => Ok(Category::Vegetables),
            "fruits" => Ok(Category::Fruits),
            "grains" => Ok(Category::Grains),
            "tools" => Ok(Category::Tools),
            "supplies" => Ok(Category::Supplies),
            "specialty" => Ok(Category::Specialty),
            other => Err(format!("unknown category '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: &'static str,
    pub name: &'static str,
    #[serde(rename = "price", serialize_with = "serialize_minor")]
    pub price_minor: i64,
    pub seller: &'static str,
    pub seller_id: &'static str,
    pub location: &'static str,
    pub image: &'static str,
    pub category: Category,
    pub stock: u32,
}

impl Product {
    pub fn price(&self) -> BigDecimal {
        from_minor_units(self.price_minor)
    }
}

fn serialize_minor<S: Serializer>(minor: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&from_minor_units(*minor).to_string())
}

const PRODUCTS: [Product; 6] = [
    Product {
        id: "1",
        name: "Fresh Organic Tomatoes",
        price_minor: 299,
        seller: "Green Valley Farms",
        seller_id: "gvf123",
        location: "Springfield, IL",
        image: "https://images.pexels.com/photos/5529599/pexels-photo-5529599.jpeg",
        category: Category::Vegetables,
        stock: 50,
    },
    Product {
        id: "2",
        name: "Premium Rice (25kg)",
        price_minor: 4250,
        seller: "Golden Harvest Co.",
        seller_id: "ghc456",
        location: "Sacramento, CA",
        image: "https://images.pexels.com/photos/4110251/pexels-photo-4110251.jpeg",
        category: Category::Grains,
        stock: 100,
    },
    Product {
        id: "3",
        name: "Heirloom Apple Variety Pack",
        price_minor: 1599,
        seller: "Hillside Orchards",
        seller_id: "ho789",
        location: "Eugene, OR",
        image: "https://images.pexels.com/photos/1510392/pexels-photo-1510392.jpeg",
        category: Category::Fruits,
        stock: 30,
    },
    Product {
        id: "4",
        name: "Handheld Garden Tiller",
        price_minor: 2999,
        seller: "AgriTools Shop",
        seller_id: "ats101",
        location: "Columbus, OH",
        image: "https://images.pexels.com/photos/369267/pexels-photo-369267.jpeg",
        category: Category::Tools,
        stock: 15,
    },
    Product {
        id: "5",
        name: "Organic Fertilizer (10kg)",
        price_minor: 1875,
        seller: "Natural Growth Inc.",
        seller_id: "ngi202",
        location: "Portland, OR",
        image: "https://images.pexels.com/photos/2749165/pexels-photo-2749165.jpeg",
        category: Category::Supplies,
        stock: 200,
    },
    Product {
        id: "6",
        name: "Artisanal Honey (1L)",
        price_minor: 2250,
        seller: "Sunny Apiaries",
        seller_id: "sa303",
        location: "Austin, TX",
        image: "https://images.pexels.com/photos/1027810/pexels-photo-1027810.jpeg",
        category: Category::Specialty,
        stock: 40,
    },
];

pub fn products() -> &'static [Product] {
    &PRODUCTS
}

pub fn find(id: &str) -> Option<Product> {
    PRODUCTS.iter().find(|product| product.id == id).copied()
}

/// Filters by a case-insensitive match on product or seller name.
/// `category` of `None` behaves like the "all" filter.
pub fn search(query: &str, category: Option<Category>) -> Vec<Product> {
    let needle = query.trim().to_lowercase();
    PRODUCTS
        .iter()
        .filter(|product| {
            product.name.to_lowercase().contains(&needle)
                || product.seller.to_lowercase().contains(&needle)
        })
        .filter(|product| category.map_or(true, |c| product.category == c))
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_returns_everything() {
        assert_eq!(search("", None).len(), 6);
    }

    #[test]
    fn matches_seller_names_case_insensitively() {
        let hits = search("ORCHARDS", None);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "3");
    }

    #[test]
    fn category_filter_narrows_results() {
        let hits = search("organic", Some(Category::Supplies));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Organic Fertilizer (10kg)");
        assert!(search("tomatoes", Some(Category::Fruits)).is_empty());
    }

    #[test]
    fn prices_render_with_cents() {
        let rice = find("2").unwrap();
        assert_eq!(rice.price().to_string(), "42.50");
        let json = serde_json::to_value(rice).unwrap();
        assert_eq!(json["price"], "42.50");
        assert_eq!(json["sellerId"], "ghc456");
        assert_eq!(json["category"], "grains");
    }

    #[test]
    fn unknown_category_is_an_error() {
        assert_eq!("Tools".parse::<Category>().unwrap(), Category::Tools);
        assert!("livestock".parse::<Category>().is_err());
    }
}
