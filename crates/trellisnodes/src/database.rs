use async_trait::async_trait;
use serde_json::{json, Map, Value};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo};

use trelliscore::{Node, NodeContext, NodeDescriptor, NodeError, NodeResult, NodeSpec};
use trellisruntime::NodeFactory;

/// SQL executor node backed by SQLite.
pub struct DatabaseNode {
    config: Map<String, Value>,
}

impl DatabaseNode {
    pub fn new(config: Map<String, Value>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Node for DatabaseNode {
    fn node_type(&self) -> &str {
        "database"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeResult, NodeError> {
        let url = ctx
            .config
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::Configuration("Missing config: url".to_string()))?
            .to_string();
        let sql = ctx
            .require_config("query")?
            .as_str()
            .ok_or_else(|| NodeError::Configuration("query must be a string".to_string()))?
            .to_string();

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("database connect failed: {}", e)))?;

        let mut query = sqlx::query(&sql);
        if let Some(Value::Array(params)) = ctx
            .input
            .get("params")
            .or_else(|| ctx.config.get("params"))
        {
            for param in params {
                query = match param {
                    Value::Null => query.bind(None::<String>),
                    Value::Bool(b) => query.bind(*b),
                    Value::Number(n) if n.is_i64() => query.bind(n.as_i64().unwrap_or(0)),
                    Value::Number(n) => query.bind(n.as_f64().unwrap_or(0.0)),
                    Value::String(s) => query.bind(s.clone()),
                    other => query.bind(other.to_string()),
                };
            }
        }

        let data = if sql.trim_start().to_uppercase().starts_with("SELECT") {
            let rows = query
                .fetch_all(&pool)
                .await
                .map_err(|e| NodeError::ExecutionFailed(format!("query failed: {}", e)))?;
            let rows: Vec<Value> = rows.iter().map(row_to_value).collect();
            let count = rows.len();
            json!({ "rows": rows, "rowCount": count })
        } else {
            let outcome = query
                .execute(&pool)
                .await
                .map_err(|e| NodeError::ExecutionFailed(format!("statement failed: {}", e)))?;
            json!({ "rowsAffected": outcome.rows_affected() })
        };

        pool.close().await;
        Ok(NodeResult::ok(data))
    }

    fn validate(&self) -> bool {
        self.config.get("url").is_some_and(|v| v.is_string())
            && self
                .config
                .get("query")
                .and_then(Value::as_str)
                .is_some_and(|q| !q.trim().is_empty())
    }

    fn describe(&self) -> NodeDescriptor {
        NodeDescriptor {
            description: "Run SQL against a SQLite database".to_string(),
            category: "data".to_string(),
            icon: "database".to_string(),
            input_schema: json!({ "params": "array of positional parameters" }),
            output_schema: json!({
                "rows": "array of row objects (SELECT)",
                "rowCount": "number (SELECT)",
                "rowsAffected": "number (other statements)",
            }),
        }
    }
}

/// Decode a row column-by-column, keyed off the column's SQLite storage class.
fn row_to_value(row: &SqliteRow) -> Value {
    let mut out = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "INTEGER" => row
                .try_get::<Option<i64>, _>(index)
                .ok()
                .flatten()
                .map(Value::from)
                .unwrap_or(Value::Null),
            "REAL" => row
                .try_get::<Option<f64>, _>(index)
                .ok()
                .flatten()
                .map(Value::from)
                .unwrap_or(Value::Null),
            "BOOLEAN" => row
                .try_get::<Option<bool>, _>(index)
                .ok()
                .flatten()
                .map(Value::from)
                .unwrap_or(Value::Null),
            "NULL" => Value::Null,
            // TEXT, DATETIME, and anything else readable as text
            _ => row
                .try_get::<Option<String>, _>(index)
                .ok()
                .flatten()
                .map(Value::from)
                .unwrap_or(Value::Null),
        };
        out.insert(column.name().to_string(), value);
    }
    Value::Object(out)
}

pub struct DatabaseNodeFactory;

impl NodeFactory for DatabaseNodeFactory {
    fn node_type(&self) -> &str {
        "database"
    }

    fn aliases(&self) -> Vec<&str> {
        vec!["db", "sql"]
    }

    fn create(&self, spec: &NodeSpec) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(DatabaseNode::new(spec.config.clone())))
    }

    fn descriptor(&self) -> NodeDescriptor {
        DatabaseNode::new(Map::new()).describe()
    }
}
