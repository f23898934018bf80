//! Warehouse inventory lookup tool
//!
//! Mock inventory for the grocery-store profile. A real deployment would
//! query a stock database or API behind the same contract.

use async_trait::async_trait;

use crate::error::ToolError;

use super::Tool;

/// Minimum similarity for a fuzzy item match
const FUZZY_CUTOFF: f64 = 0.6;

struct Item {
    name: &'static str,
    quantity: u32,
    aisle: Option<u32>,
    discontinued: bool,
}

const INVENTORY: &[Item] = &[
    Item { name: "organic almond milk", quantity: 10, aisle: Some(5), discontinued: false },
    Item { name: "signature coffee", quantity: 24, aisle: Some(12), discontinued: false },
    Item { name: "paddle boards", quantity: 0, aisle: None, discontinued: true },
];

/// Looks up stock levels by item name, with fuzzy matching for
/// transcription noise ("almond milks", "paddleboards")
pub struct InventoryLookupTool;

#[async_trait]
impl Tool for InventoryLookupTool {
    fn name(&self) -> &str {
        "inventory_lookup"
    }

    fn usage(&self) -> &str {
        r#"look up stock by item name, arguments: {"item": "<name>"}"#
    }

    async fn execute(&self, arguments: &serde_json::Value) -> Result<String, ToolError> {
        let item = arguments
            .get("item")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ToolError::ExecutionFailed("missing string argument \"item\"".to_string())
            })?;

        Ok(lookup(item))
    }
}

/// Plain-text inventory answer, or "not_found"
fn lookup(item_name: &str) -> String {
    let wanted = item_name.to_lowercase();

    let exact = INVENTORY.iter().find(|item| item.name == wanted);
    let matched = exact.or_else(|| {
        INVENTORY
            .iter()
            .map(|item| (item, similarity(&wanted, item.name)))
            .filter(|(_, score)| *score >= FUZZY_CUTOFF)
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(item, _)| item)
    });

    match matched {
        Some(item) if item.discontinued => format!("{} is discontinued.", item.name),
        Some(item) => format!(
            "{} in aisle {}",
            item.quantity,
            item.aisle.map_or_else(|| "unknown".to_string(), |a| a.to_string())
        ),
        None => "not_found".to_string(),
    }
}

/// Normalized similarity in [0, 1] based on edit distance
fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let score = 1.0 - edit_distance(a, b) as f64 / longest as f64;
    score
}

/// Levenshtein distance over chars
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}
