use serde_json::Value;
use sqlgate_protocol::{ChartRequest, ChartSuggestion, Row};

const NUMERIC_SAMPLE: usize = 20;
const PREFERRED_VALUES: [&str; 4] = ["price", "mileage", "amount", "total"];

/// Proposes how a result set should be drawn.
#[async_trait::async_trait]
pub trait ChartAdvisor: Send + Sync {
    async fn suggest(&self, req: &ChartRequest) -> ChartSuggestion;
}

/// Bar chart grouped by the first categorical, non-identifier column.
/// Averages a well-known numeric value column when one is present,
/// otherwise counts rows per group.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeuristicChartAdvisor;

#[async_trait::async_trait]
impl ChartAdvisor for HeuristicChartAdvisor {
    async fn suggest(&self, req: &ChartRequest) -> ChartSuggestion {
        heuristic(req)
    }
}

fn is_identifier(col: &str) -> bool {
    let lower = col.to_ascii_lowercase();
    lower == "id" || lower == "vin" || lower.ends_with("_id")
}

fn numeric_value(v: Option<&Value>) -> bool {
    match v {
        Some(Value::Number(_)) | Some(Value::Bool(_)) => true,
        Some(Value::String(s)) => s.trim().parse::<f64>().is_ok(),
        _ => false,
    }
}

fn is_numeric(col: &str, sample: &[Row]) -> bool {
    !sample.is_empty()
        && sample
            .iter()
            .take(NUMERIC_SAMPLE)
            .all(|row| numeric_value(row.get(col)))
}

pub fn heuristic(req: &ChartRequest) -> ChartSuggestion {
    let Some(first) = req.columns.first() else {
        return ChartSuggestion::bar();
    };
    let sample = &req.rows[..req.rows.len().min(req.max_rows)];
    let categorical: Vec<&String> = req
        .columns
        .iter()
        .filter(|c| !is_numeric(c, sample))
        .collect();
    let group_by = categorical
        .iter()
        .find(|c| !is_identifier(c))
        .or_else(|| categorical.first())
        .map(|c| c.to_string())
        .unwrap_or_else(|| first.clone());

    let value_key = PREFERRED_VALUES
        .iter()
        .find_map(|pref| req.columns.iter().find(|c| c.to_ascii_lowercase() == *pref))
        .filter(|c| is_numeric(c, sample))
        .cloned();
    let agg = if value_key.is_some() { "avg" } else { "count" };

    ChartSuggestion {
        x_key: Some(group_by.clone()),
        group_by: Some(group_by),
        agg: Some(agg.to_string()),
        value_key,
        ..ChartSuggestion::bar()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(values: Vec<Value>) -> Vec<Row> {
        values
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect()
    }

    fn request(columns: &[&str], data: Vec<Value>) -> ChartRequest {
        ChartRequest {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows(data),
            max_rows: 200,
            prompt: None,
        }
    }

    #[test]
    fn averages_preferred_value_by_category() {
        let req = request(
            &["id", "make", "Price"],
            vec![
                json!({"id": 1, "make": "bmw", "Price": 10.5}),
                json!({"id": 2, "make": "audi", "Price": "12"}),
            ],
        );
        let s = heuristic(&req);
        assert_eq!(s.r#type, "bar");
        assert_eq!(s.group_by.as_deref(), Some("make"));
        assert_eq!(s.x_key.as_deref(), Some("make"));
        assert_eq!(s.agg.as_deref(), Some("avg"));
        assert_eq!(s.value_key.as_deref(), Some("Price"));
    }

    #[test]
    fn counts_when_value_column_is_not_numeric() {
        let req = request(
            &["customer_id", "status", "total"],
            vec![json!({"customer_id": "c1", "status": "open", "total": "n/a"})],
        );
        let s = heuristic(&req);
        assert_eq!(s.group_by.as_deref(), Some("status"));
        assert_eq!(s.agg.as_deref(), Some("count"));
        assert!(s.value_key.is_none());
    }

    #[test]
    fn no_rows_means_everything_is_categorical() {
        let req = request(&["id", "amount"], Vec::new());
        let s = heuristic(&req);
        assert_eq!(s.group_by.as_deref(), Some("amount"));
        assert_eq!(s.agg.as_deref(), Some("count"));
    }

    #[test]
    fn all_numeric_groups_by_first_column() {
        let req = request(&["n", "total"], vec![json!({"n": 1, "total": 2})]);
        let s = heuristic(&req);
        assert_eq!(s.group_by.as_deref(), Some("n"));
        assert_eq!(s.value_key.as_deref(), Some("total"));
    }

    #[tokio::test]
    async fn empty_columns_default_to_plain_bar() {
        let s = HeuristicChartAdvisor.suggest(&request(&[], Vec::new())).await;
        assert_eq!(s, ChartSuggestion::bar());
    }
}
