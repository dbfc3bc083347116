//! Invoice line-item schema types and validation of parsed model output.
//!
//! Wire keys are the human-readable column names the model is asked to emit
//! (`"Item ID"`, `"Unit Price"`, ...), not Rust-style identifiers.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const ITEM_ID: &str = "Item ID";
pub const ITEM_DESCRIPTION: &str = "Item Description";
pub const UNIT_PRICE: &str = "Unit Price";
pub const QUANTITY: &str = "Quantity";
pub const TAX_AMOUNT: &str = "Tax Amount";
pub const TOTAL_AMOUNT: &str = "Total Amount";

/// Every field an item must carry, in table order.
pub const FIELD_NAMES: [&str; 6] = [
    ITEM_ID,
    ITEM_DESCRIPTION,
    UNIT_PRICE,
    QUANTITY,
    TAX_AMOUNT,
    TOTAL_AMOUNT,
];

const AMOUNT_FIELDS: [&str; 4] = [UNIT_PRICE, QUANTITY, TAX_AMOUNT, TOTAL_AMOUNT];

/// A single invoice line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "Item ID")]
    pub item_id: String,
    #[serde(rename = "Item Description")]
    pub description: String,
    #[serde(rename = "Unit Price")]
    pub unit_price: f64,
    #[serde(rename = "Quantity")]
    pub quantity: f64,
    #[serde(rename = "Tax Amount")]
    pub tax_amount: f64,
    #[serde(rename = "Total Amount")]
    pub total_amount: f64,
}

/// Root extraction result returned to clients.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Items {
    pub items: Vec<Item>,
}

/// A single schema violation found in the model's output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl Violation {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// JSON Schema for [`Items`], embedded verbatim in the user prompt.
pub fn items_json_schema() -> Value {
    json!({
        "title": "Items",
        "type": "object",
        "required": ["items"],
        "properties": {
            "items": {
                "title": "Items",
                "description": "A list containing the invoice entries for each item purchased.",
                "type": "array",
                "items": {
                    "title": "Item",
                    "type": "object",
                    "required": FIELD_NAMES,
                    "properties": {
                        ITEM_ID: {
                            "type": "string",
                            "description": "The part number or unique identifier for the item listed on the invoice."
                        },
                        ITEM_DESCRIPTION: {
                            "type": "string",
                            "description": "A textual description of the item, usually including product type and compatibility."
                        },
                        UNIT_PRICE: {
                            "type": "number",
                            "description": "The price for a single unit of the item, excluding any tax."
                        },
                        QUANTITY: {
                            "type": "number",
                            "description": "The number of units of the item purchased."
                        },
                        TAX_AMOUNT: {
                            "type": "number",
                            "description": "The total amount of tax applied to the item."
                        },
                        TOTAL_AMOUNT: {
                            "type": "number",
                            "description": "The total cost of the item, including tax."
                        }
                    }
                }
            }
        }
    })
}

/// Validate a parsed value against the item schema.
///
/// Accepts either `{"items": [...]}` or a bare array of items. All violations
/// are collected rather than stopping at the first one.
pub fn validate(value: &Value) -> Result<Items, Vec<Violation>> {
    let entries = match value {
        Value::Object(obj) => match obj.get("items") {
            Some(Value::Array(entries)) => entries,
            Some(other) => {
                return Err(vec![Violation::new(
                    "items",
                    format!("expected an array, found {}", type_name(other)),
                )])
            }
            None => return Err(vec![Violation::new("items", "missing required key")]),
        },
        Value::Array(entries) => entries,
        other => {
            return Err(vec![Violation::new(
                "$",
                format!("expected an object or array, found {}", type_name(other)),
            )])
        }
    };

    let mut items = Vec::with_capacity(entries.len());
    let mut violations = Vec::new();

    for (index, entry) in entries.iter().enumerate() {
        let path = format!("items[{}]", index);
        match entry {
            Value::Object(fields) => match validate_item(&path, fields) {
                Ok(item) => items.push(item),
                Err(mut found) => violations.append(&mut found),
            },
            other => violations.push(Violation::new(
                path,
                format!("expected an object, found {}", type_name(other)),
            )),
        }
    }

    if violations.is_empty() {
        Ok(Items { items })
    } else {
        Err(violations)
    }
}

fn validate_item(path: &str, fields: &Map<String, Value>) -> Result<Item, Vec<Violation>> {
    let mut violations = Vec::new();

    let item_id = match fields.get(ITEM_ID) {
        Some(Value::String(s)) => Some(s.clone()),
        // Numeric part numbers are common; keep them as their literal text.
        Some(Value::Number(n)) => Some(n.to_string()),
        other => {
            violations.push(field_violation(path, ITEM_ID, "a string", other));
            None
        }
    };

    let description = match fields.get(ITEM_DESCRIPTION) {
        Some(Value::String(s)) => Some(s.clone()),
        other => {
            violations.push(field_violation(path, ITEM_DESCRIPTION, "a string", other));
            None
        }
    };

    let mut amounts = [0.0f64; 4];
    for (slot, field) in amounts.iter_mut().zip(AMOUNT_FIELDS) {
        match fields.get(field).and_then(Value::as_f64) {
            Some(n) => *slot = n,
            None => violations.push(field_violation(path, field, "a number", fields.get(field))),
        }
    }

    match (item_id, description) {
        (Some(item_id), Some(description)) if violations.is_empty() => {
            let [unit_price, quantity, tax_amount, total_amount] = amounts;
            Ok(Item {
                item_id,
                description,
                unit_price,
                quantity,
                tax_amount,
                total_amount,
            })
        }
        _ => Err(violations),
    }
}

fn field_violation(path: &str, field: &str, expected: &str, found: Option<&Value>) -> Violation {
    let message = match found {
        None => "missing required field".to_string(),
        Some(value) => format!("expected {}, found {}", expected, type_name(value)),
    };
    Violation::new(format!("{}.{}", path, field), message)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
