// DynamoDB Store Adapter
//
// `KvStore` over the AWS SDK, aimed at DynamoDB Local. Service errors are
// mapped onto `StoreErrorKind` here so callers never inspect error text.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::config::{Credentials, Region};
use aws_sdk_dynamodb::error::{DisplayErrorContext, SdkError};
use aws_sdk_dynamodb::operation::describe_table::DescribeTableError;
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType, Put,
    ScalarAttributeType, TransactWriteItem,
};
use aws_config::BehaviorVersion;
use tracing::debug;

use super::{
    ContinuationToken, Key, KvStore, PutCondition, Row, Scalar, ScanPage, StoreError,
    StoreErrorKind, PK, SK,
};
use crate::guard::classify_cancellation_reasons;

/// Condition expression for `PutCondition::KeyNotExists`.
const KEY_NOT_EXISTS: &str = "attribute_not_exists(PK)";

#[derive(Debug, Clone)]
pub struct DynamoDbStore {
    client: aws_sdk_dynamodb::Client,
    transactional_puts: bool,
}

impl DynamoDbStore {
    /// Client for DynamoDB Local (or LocalStack) listening on `port`.
    ///
    /// Credentials are dummies; the local service ignores them.
    pub async fn local(port: u16, transactional_puts: bool) -> Self {
        let credentials = Credentials::new("dummy", "dummy", Some("dummy".into()), None, "contend");
        let config = aws_config::defaults(BehaviorVersion::latest())
            .endpoint_url(format!("http://localhost:{port}"))
            .region(Region::new("us-east-1"))
            .credentials_provider(credentials)
            .load()
            .await;

        Self {
            client: aws_sdk_dynamodb::Client::new(&config),
            transactional_puts,
        }
    }

    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        match self.client.describe_table().table_name(table).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                if matches!(
                    err.as_service_error(),
                    Some(DescribeTableError::ResourceNotFoundException(_))
                ) {
                    Ok(false)
                } else {
                    Err(backend(err))
                }
            }
        }
    }

    async fn put_single(
        &self,
        table: &str,
        item: HashMap<String, AttributeValue>,
        condition: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = self
            .client
            .put_item()
            .table_name(table)
            .set_item(Some(item))
            .set_condition_expression(condition.map(str::to_string))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                if matches!(err, SdkError::ServiceError(ref inner) if matches!(inner.err(), PutItemError::ConditionalCheckFailedException(_)))
                {
                    Err(StoreError::conditional_check_failed(
                        DisplayErrorContext(&err).to_string(),
                    ))
                } else if matches!(
                    err.as_service_error(),
                    Some(PutItemError::ResourceNotFoundException(_))
                ) {
                    Err(StoreError::table_not_found(table))
                } else {
                    Err(backend(err))
                }
            }
        }
    }

    async fn put_transactional(
        &self,
        table: &str,
        item: HashMap<String, AttributeValue>,
        condition: Option<&str>,
    ) -> Result<(), StoreError> {
        let put = Put::builder()
            .table_name(table)
            .set_item(Some(item))
            .set_condition_expression(condition.map(str::to_string))
            .build()
            .map_err(|e| StoreError::new(StoreErrorKind::Codec, e.to_string()))?;

        let result = self
            .client
            .transact_write_items()
            .transact_items(TransactWriteItem::builder().put(put).build())
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => match err.as_service_error() {
                Some(TransactWriteItemsError::TransactionCanceledException(cancelled)) => {
                    let kind = classify_cancellation_reasons(
                        cancelled.cancellation_reasons().iter().map(|r| r.code()),
                    );
                    Err(StoreError::new(kind, DisplayErrorContext(&err).to_string()))
                }
                Some(TransactWriteItemsError::ResourceNotFoundException(_)) => {
                    Err(StoreError::table_not_found(table))
                }
                _ => Err(backend(err)),
            },
        }
    }
}

#[async_trait]
impl KvStore for DynamoDbStore {
    async fn create_table(&self, table: &str) -> Result<bool, StoreError> {
        if self.table_exists(table).await? {
            return Ok(false);
        }

        let attribute = |name: &str| {
            AttributeDefinition::builder()
                .attribute_name(name)
                .attribute_type(ScalarAttributeType::S)
                .build()
                .map_err(|e| StoreError::new(StoreErrorKind::Codec, e.to_string()))
        };
        let key_element = |name: &str, key_type: KeyType| {
            KeySchemaElement::builder()
                .attribute_name(name)
                .key_type(key_type)
                .build()
                .map_err(|e| StoreError::new(StoreErrorKind::Codec, e.to_string()))
        };

        self.client
            .create_table()
            .table_name(table)
            .attribute_definitions(attribute(PK)?)
            .attribute_definitions(attribute(SK)?)
            .key_schema(key_element(PK, KeyType::Hash)?)
            .key_schema(key_element(SK, KeyType::Range)?)
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await
            .map_err(backend)?;

        debug!(table, "created DynamoDB table");
        Ok(true)
    }

    async fn put_item(
        &self,
        table: &str,
        row: Row,
        condition: Option<PutCondition>,
    ) -> Result<(), StoreError> {
        let item = to_item(&row);
        let condition = condition.map(|PutCondition::KeyNotExists| KEY_NOT_EXISTS);

        if self.transactional_puts {
            self.put_transactional(table, item, condition).await
        } else {
            self.put_single(table, item, condition).await
        }
    }

    async fn scan(
        &self,
        table: &str,
        token: Option<ContinuationToken>,
    ) -> Result<ScanPage, StoreError> {
        let output = self
            .client
            .scan()
            .table_name(table)
            .set_exclusive_start_key(token.map(|t| key_item(t.last_key())))
            .send()
            .await
            .map_err(backend)?;

        let rows = output
            .items()
            .iter()
            .map(from_item)
            .collect::<Result<Vec<_>, _>>()?;

        let next = output
            .last_evaluated_key()
            .map(|key| from_item(key).and_then(|row| row.key().map_err(codec)))
            .transpose()?
            .map(ContinuationToken::new);

        Ok(ScanPage { rows, next })
    }

    async fn update_item(
        &self,
        table: &str,
        key: &Key,
        attribute: &str,
        value: Scalar,
    ) -> Result<(), StoreError> {
        self.client
            .update_item()
            .table_name(table)
            .set_key(Some(key_item(key)))
            .update_expression("SET #attr = :value")
            .expression_attribute_names("#attr", attribute)
            .expression_attribute_values(":value", to_attribute(&value))
            .send()
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn delete_item(&self, table: &str, key: &Key) -> Result<(), StoreError> {
        self.client
            .delete_item()
            .table_name(table)
            .set_key(Some(key_item(key)))
            .send()
            .await
            .map_err(backend)?;
        Ok(())
    }
}

fn backend<E, R>(err: SdkError<E, R>) -> StoreError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    StoreError::new(StoreErrorKind::Backend, DisplayErrorContext(&err).to_string())
}

fn codec(err: impl std::fmt::Display) -> StoreError {
    StoreError::new(StoreErrorKind::Codec, err.to_string())
}

fn key_item(key: &Key) -> HashMap<String, AttributeValue> {
    HashMap::from([
        (PK.to_string(), AttributeValue::S(key.pk.clone())),
        (SK.to_string(), AttributeValue::S(key.sk.clone())),
    ])
}

fn to_attribute(value: &Scalar) -> AttributeValue {
    match value {
        Scalar::S(s) => AttributeValue::S(s.clone()),
        Scalar::N(n) => AttributeValue::N(n.clone()),
        Scalar::Bool(b) => AttributeValue::Bool(*b),
    }
}

fn to_item(row: &Row) -> HashMap<String, AttributeValue> {
    row.attributes()
        .map(|(name, value)| (name.to_string(), to_attribute(value)))
        .collect()
}

fn from_item(item: &HashMap<String, AttributeValue>) -> Result<Row, StoreError> {
    item.iter()
        .map(|(name, value)| {
            let scalar = match value {
                AttributeValue::S(s) => Scalar::S(s.clone()),
                AttributeValue::N(n) => Scalar::N(n.clone()),
                AttributeValue::Bool(b) => Scalar::Bool(*b),
                other => {
                    return Err(codec(format!(
                        "attribute `{name}` has unsupported type {other:?}"
                    )))
                }
            };
            Ok((name.clone(), scalar))
        })
        .collect()
}
