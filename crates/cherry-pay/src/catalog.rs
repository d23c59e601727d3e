//! Static product catalog for the default checkout

/// A purchasable subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Product {
    pub id: &'static str,
    pub label: &'static str,
    pub duration_days: u32,
    pub trial: bool,
}

pub const PRODUCTS: [Product; 5] = [
    Product {
        id: "1",
        label: "Trial Subscription (3 days)",
        duration_days: 3,
        trial: true,
    },
    Product {
        id: "2",
        label: "Subscription (1 month)",
        duration_days: 30,
        trial: false,
    },
    Product {
        id: "3",
        label: "Subscription (3 months)",
        duration_days: 90,
        trial: false,
    },
    Product {
        id: "4",
        label: "Subscription (12 months)",
        duration_days: 365,
        trial: false,
    },
    Product {
        id: "5",
        label: "Subscription (7 days)",
        duration_days: 7,
        trial: false,
    },
];

pub fn product_catalog() -> &'static [Product] {
    &PRODUCTS
}

pub fn product(id: &str) -> Option<&'static Product> {
    PRODUCTS.iter().find(|p| p.id == id)
}
