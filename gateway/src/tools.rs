//! Function declarations advertised to the upstream model.
//!
//! The implementations live behind [`sb_core::traits::ToolRegistry`]; only
//! the schemas are defined here.

use serde_json::{json, Value};

pub fn tool_declarations() -> Vec<Value> {
    vec![
        json!({
            "name": "search_products",
            "description": "ეძებს პროდუქტებს კატალოგში სემანტიკურად. გამოიყენე როცა მომხმარებელს პროდუქტი სჭირდება.",
            "parameters": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "საძიებო ფრაზა ქართულად ან ინგლისურად"
                    },
                    "category": {
                        "type": "string",
                        "enum": ["protein", "creatine", "bcaa", "pre_workout", "vitamin", "gainer"]
                    },
                    "max_price": {
                        "type": "number",
                        "description": "მაქსიმალური ფასი ლარში"
                    }
                },
                "required": ["query"]
            }
        }),
        json!({
            "name": "get_profile",
            "description": "აბრუნებს მომხმარებლის პროფილს (სახელი, ფიზიკური მონაცემები, ფაქტები).",
            "parameters": { "type": "object", "properties": {} }
        }),
        json!({
            "name": "get_product_details",
            "description": "აბრუნებს ერთი პროდუქტის დეტალებს id-ით.",
            "parameters": {
                "type": "object",
                "properties": {
                    "product_id": { "type": "string" }
                },
                "required": ["product_id"]
            }
        }),
    ]
}
