//! MongoDB document store
//!
//! Predicates render to a filter document rather than SQL. Collections play
//! the role of tables and documents the role of rows.

use async_trait::async_trait;
use bson::{Bson, Document, Regex};
use futures::TryStreamExt;
use mongodb::options::FindOptions;
use mongodb::{Client, Database};
use serde_json::Value;

use super::{ConnectOptions, Connection, Connector, ReadQuery, WriteBatch, WriteMode};
use crate::error::{EtlError, Result};
use crate::filter::{like_to_regex, CompareOp, Predicate, Test};
use crate::pipeline::{DatabaseDescriptor, Dialect};
use crate::working_set::Row;

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub(super) struct MongoConnector;

#[async_trait]
impl Connector for MongoConnector {
    async fn connect(
        &self,
        descriptor: &DatabaseDescriptor,
        _options: &ConnectOptions,
    ) -> Result<Box<dyn Connection>> {
        let uri = descriptor
            .connection_uri
            .as_deref()
            .ok_or_else(|| EtlError::Config("MongoDB requires 'connection_uri'".into()))?;

        let client = Client::with_uri_str(uri).await?;
        let database = match descriptor.database.as_deref() {
            Some(name) => client.database(name),
            None => client
                .default_database()
                .ok_or_else(|| EtlError::Config("connection_uri names no database".into()))?,
        };
        database.run_command(bson::doc! { "ping": 1 }).await?;

        Ok(Box::new(MongoConnection { client, database }))
    }
}

struct MongoConnection {
    client: Client,
    database: Database,
}

fn bson_value(value: &Value) -> Result<Bson> {
    bson::to_bson(value).map_err(EtlError::query)
}

fn field(column: &str, condition: Document) -> Document {
    let mut doc = Document::new();
    doc.insert(column, condition);
    doc
}

fn operator(op: &str, value: Bson) -> Document {
    let mut doc = Document::new();
    doc.insert(op, value);
    doc
}

/// Filter document equivalent to `predicate`
pub(super) fn to_filter(predicate: &Predicate) -> Result<Document> {
    match predicate {
        Predicate::All(parts) => {
            let parts = parts.iter().map(to_filter).collect::<Result<Vec<_>>>()?;
            Ok(operator("$and", Bson::from(parts)))
        },
        Predicate::Any(parts) => {
            let parts = parts.iter().map(to_filter).collect::<Result<Vec<_>>>()?;
            Ok(operator("$or", Bson::from(parts)))
        },
        Predicate::Column { column, test } => column_filter(column, test),
    }
}

fn column_filter(column: &str, test: &Test) -> Result<Document> {
    let doc = match test {
        Test::Compare { op, value, .. } => {
            let name = match op {
                CompareOp::Eq => "$eq",
                CompareOp::Ne => "$ne",
                CompareOp::Gt => "$gt",
                CompareOp::Gte => "$gte",
                CompareOp::Lt => "$lt",
                CompareOp::Lte => "$lte",
            };
            field(column, operator(name, bson_value(value)?))
        },
        Test::Null { negated } => {
            let name = if *negated { "$ne" } else { "$eq" };
            field(column, operator(name, Bson::Null))
        },
        Test::Bool { value, negated } => {
            let name = if *negated { "$ne" } else { "$eq" };
            field(column, operator(name, Bson::Boolean(*value)))
        },
        Test::Like {
            pattern,
            negated,
            case_insensitive,
            ..
        } => {
            let regex = Regex {
                pattern: like_to_regex(pattern),
                options: if *case_insensitive { "i" } else { "" }.to_string(),
            };
            if *negated {
                field(column, operator("$not", Bson::RegularExpression(regex)))
            } else {
                field(column, operator("$regex", Bson::RegularExpression(regex)))
            }
        },
        Test::In { values, negated } => {
            let name = if *negated { "$nin" } else { "$in" };
            let values = values.iter().map(bson_value).collect::<Result<Vec<_>>>()?;
            field(column, operator(name, Bson::Array(values)))
        },
        Test::Between { low, high, negated } => {
            let (low, high) = (bson_value(low)?, bson_value(high)?);
            if *negated {
                let below = field(column, operator("$lt", low));
                let above = field(column, operator("$gt", high));
                operator("$or", Bson::from(vec![below, above]))
            } else {
                let mut range = operator("$gte", low);
                range.insert("$lte", high);
                field(column, range)
            }
        },
    };
    Ok(doc)
}

fn to_json(value: Bson) -> Value {
    match value {
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(at) => Value::String(at.to_chrono().format(DATETIME_FORMAT).to_string()),
        Bson::Document(doc) => Value::Object(to_row(doc)),
        Bson::Array(items) => Value::Array(items.into_iter().map(to_json).collect()),
        other => other.into_relaxed_extjson(),
    }
}

fn to_row(doc: Document) -> Row {
    doc.into_iter().map(|(k, v)| (k, to_json(v))).collect()
}

fn to_document(row: &Row, columns: &[String]) -> Result<Document> {
    let mut doc = Document::new();
    for column in columns {
        let value = row.get(column).unwrap_or(&Value::Null);
        doc.insert(column.clone(), bson_value(value)?);
    }
    Ok(doc)
}

#[async_trait]
impl Connection for MongoConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Mongodb
    }

    async fn fetch(&self, query: &ReadQuery) -> Result<Vec<Row>> {
        let collection = self.database.collection::<Document>(&query.table);
        let filter = match &query.predicate {
            Some(predicate) => to_filter(predicate)?,
            None => Document::new(),
        };

        let mut find = collection.find(filter);
        if !query.columns.is_empty() {
            let mut projection = Document::new();
            for column in &query.columns {
                projection.insert(column.clone(), 1);
            }
            if !query.columns.iter().any(|c| c == "_id") {
                projection.insert("_id", 0);
            }
            find = find.with_options(FindOptions::builder().projection(projection).build());
        }

        let docs: Vec<Document> = find.await?.try_collect().await?;
        Ok(docs.into_iter().map(to_row).collect())
    }

    async fn write(&self, batch: &WriteBatch<'_>) -> Result<u64> {
        let collection = self.database.collection::<Document>(batch.table);
        let docs = batch
            .rows
            .iter()
            .map(|row| to_document(row, batch.columns))
            .collect::<Result<Vec<_>>>()?;

        match batch.mode {
            WriteMode::Insert => {
                let result = collection.insert_many(docs).await?;
                Ok(result.inserted_ids.len() as u64)
            },
            WriteMode::Upsert { unique } => {
                let mut affected = 0;
                for doc in docs {
                    let mut key = Document::new();
                    for column in unique {
                        key.insert(column.clone(), doc.get(column).cloned().unwrap_or(Bson::Null));
                    }
                    collection.replace_one(key, doc).upsert(true).await?;
                    affected += 1;
                }
                Ok(affected)
            },
        }
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        Ok(self.database.list_collection_names().await?)
    }

    async fn close(&self) -> Result<()> {
        self.client.clone().shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::filter::compile;
    use crate::pipeline::FilterGroup;
    use serde_json::json;

    fn filter(groups: serde_json::Value) -> Document {
        let groups: Vec<FilterGroup> = serde_json::from_value(groups).unwrap();
        to_filter(&compile(&groups, None, Dialect::Mongodb).unwrap().unwrap()).unwrap()
    }

    #[test]
    fn test_compare_and_in() {
        let doc = filter(json!([
            {"columns": ["status"], "operator": "in", "value": ["paid", "shipped"]},
            {"columns": ["amount"], "operator": "gt", "value": 10}
        ]));
        assert_eq!(
            doc,
            bson::doc! {
                "$and": [
                    { "status": { "$in": ["paid", "shipped"] } },
                    { "amount": { "$gt": 10_i64 } }
                ]
            }
        );
    }

    #[test]
    fn test_between_and_null() {
        assert_eq!(
            filter(json!([{"columns": ["score"], "operator": "notBetween", "value": [1, 5]}])),
            bson::doc! { "$or": [ { "score": { "$lt": 1_i64 } }, { "score": { "$gt": 5_i64 } } ] }
        );
        assert_eq!(
            filter(json!([{"columns": ["deleted_at"], "operator": "ne", "value": null}])),
            bson::doc! { "deleted_at": { "$ne": null } }
        );
    }

    #[test]
    fn test_like_becomes_anchored_regex() {
        let doc = filter(json!([{"columns": ["name"], "operator": "like", "value": "al%"}]));
        let regex = doc.get_document("name").unwrap().get("$regex").unwrap();
        assert_eq!(
            regex,
            &Bson::RegularExpression(Regex {
                pattern: "^al.*$".into(),
                options: String::new()
            })
        );
    }

    #[test]
    fn test_documents_convert_to_rows() {
        let oid = bson::oid::ObjectId::new();
        let row = to_row(bson::doc! { "_id": oid, "n": 3_i32, "tags": ["a"] });
        assert_eq!(row["_id"], json!(oid.to_hex()));
        assert_eq!(row["n"], json!(3));
        assert_eq!(row["tags"], json!(["a"]));
    }
}
