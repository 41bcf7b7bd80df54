use async_trait::async_trait;
use aws_sdk_dynamodbstreams::{
    error::{DisplayErrorContext, SdkError},
    operation::{
        describe_stream::DescribeStreamError, get_records::GetRecordsError,
        get_shard_iterator::GetShardIteratorError,
    },
    types::{Record, Shard},
    Client,
};
use aws_smithy_types_convert::date_time::DateTimeExt;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, trace};

use crate::types::{ChangeRecord, RecordPage, SequenceNumber, ShardDescriptor, ShardIteratorType};

/// Failures reported by a [`StreamClient`]
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    #[error("Shard iterator expired")]
    ExpiredIterator,

    #[error("Request limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Internal server error: {0}")]
    InternalServer(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Trimmed data access: {0}")]
    TrimmedDataAccess(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("{0}")]
    Other(String),
}

impl StreamError {
    /// Whether a call failing with this error may simply be repeated.
    ///
    /// An expired iterator is not: the token itself is dead and a new one has
    /// to be acquired first.
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::LimitExceeded(_)
            | StreamError::InternalServer(_)
            | StreamError::Timeout(_)
            | StreamError::Connection(_)
            | StreamError::Other(_) => true,
            StreamError::ExpiredIterator
            | StreamError::TrimmedDataAccess(_)
            | StreamError::ResourceNotFound(_) => false,
        }
    }

    pub fn is_expired_iterator(&self) -> bool {
        matches!(self, StreamError::ExpiredIterator)
    }
}

/// Remote stream API used by the listener
#[async_trait]
pub trait StreamClient: Send + Sync {
    /// Every shard currently retained by the stream
    async fn list_shards(&self, stream_arn: &str) -> Result<Vec<ShardDescriptor>, StreamError>;

    /// Returns `None` when the service has no iterator to hand out, which only
    /// happens for a closed shard with nothing left to read
    async fn get_shard_iterator(
        &self,
        stream_arn: &str,
        shard_id: &str,
        iterator_type: ShardIteratorType,
        sequence_number: Option<&str>,
    ) -> Result<Option<String>, StreamError>;

    async fn get_records(
        &self,
        shard_id: &str,
        iterator: &str,
        limit: i32,
    ) -> Result<RecordPage, StreamError>;
}

/// Builds a DynamoDB Streams client from the default AWS configuration chain
pub async fn client_from_env() -> Client {
    let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    Client::new(&config)
}

#[async_trait]
impl StreamClient for Client {
    async fn list_shards(&self, stream_arn: &str) -> Result<Vec<ShardDescriptor>, StreamError> {
        let mut shards = Vec::new();
        let mut exclusive_start: Option<String> = None;

        loop {
            let response = self
                .describe_stream()
                .stream_arn(stream_arn)
                .set_exclusive_start_shard_id(exclusive_start.take())
                .send()
                .await
                .map_err(classify_describe_stream)?;

            let Some(description) = response.stream_description() else {
                break;
            };

            shards.extend(description.shards().iter().filter_map(shard_descriptor));

            match description.last_evaluated_shard_id() {
                Some(last) => {
                    trace!(stream_arn = %stream_arn, last_shard = %last, "Fetching next shard page");
                    exclusive_start = Some(last.to_string());
                }
                None => break,
            }
        }

        debug!(stream_arn = %stream_arn, shard_count = shards.len(), "Listed shards");
        Ok(shards)
    }

    async fn get_shard_iterator(
        &self,
        stream_arn: &str,
        shard_id: &str,
        iterator_type: ShardIteratorType,
        sequence_number: Option<&str>,
    ) -> Result<Option<String>, StreamError> {
        let mut req = self
            .get_shard_iterator()
            .stream_arn(stream_arn)
            .shard_id(shard_id)
            .shard_iterator_type(iterator_type.into());

        if let Some(seq) = sequence_number {
            req = req.sequence_number(seq);
        }

        let response = req.send().await.map_err(classify_get_shard_iterator)?;
        Ok(response.shard_iterator().map(String::from))
    }

    async fn get_records(
        &self,
        shard_id: &str,
        iterator: &str,
        limit: i32,
    ) -> Result<RecordPage, StreamError> {
        let response = self
            .get_records()
            .shard_iterator(iterator)
            .limit(limit)
            .send()
            .await
            .map_err(classify_get_records)?;

        let records = response
            .records()
            .iter()
            .filter_map(|record| change_record(shard_id, record))
            .collect();

        Ok(RecordPage {
            records,
            next_iterator: response.next_shard_iterator().map(String::from),
        })
    }
}

fn shard_descriptor(shard: &Shard) -> Option<ShardDescriptor> {
    let shard_id = shard.shard_id()?.to_string();
    let closed = shard
        .sequence_number_range()
        .and_then(|range| range.ending_sequence_number())
        .is_some();

    Some(ShardDescriptor {
        shard_id,
        parent_ids: shard.parent_shard_id().map(String::from).into_iter().collect(),
        closed,
    })
}

fn change_record(shard_id: &str, record: &Record) -> Option<ChangeRecord> {
    let stream_record = record.dynamodb()?;
    let sequence_number = stream_record.sequence_number()?;

    Some(ChangeRecord {
        shard_id: shard_id.to_string(),
        sequence_number: SequenceNumber::new(sequence_number),
        event_id: record.event_id().map(String::from),
        event_name: record.event_name().map(|name| name.as_str().to_string()),
        approximate_creation_time: stream_record
            .approximate_creation_date_time()
            .and_then(to_chrono),
        stream_record: Some(stream_record.clone()),
    })
}

fn to_chrono(dt: &aws_smithy_types::DateTime) -> Option<DateTime<Utc>> {
    dt.to_chrono_utc().ok()
}

fn classify_transport<E, R>(err: &SdkError<E, R>) -> Option<StreamError>
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match err {
        SdkError::TimeoutError(_) => Some(StreamError::Timeout(
            DisplayErrorContext(err).to_string(),
        )),
        SdkError::DispatchFailure(_) => Some(StreamError::Connection(
            DisplayErrorContext(err).to_string(),
        )),
        _ => None,
    }
}

fn classify_describe_stream<R>(err: SdkError<DescribeStreamError, R>) -> StreamError
where
    R: std::fmt::Debug,
{
    if let Some(transport) = classify_transport(&err) {
        return transport;
    }
    let message = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::ServiceError(service) => match service.into_err() {
            DescribeStreamError::ResourceNotFoundException(_) => {
                StreamError::ResourceNotFound(message)
            }
            DescribeStreamError::InternalServerError(_) => StreamError::InternalServer(message),
            _ => StreamError::Other(message),
        },
        _ => StreamError::Other(message),
    }
}

fn classify_get_shard_iterator<R>(err: SdkError<GetShardIteratorError, R>) -> StreamError
where
    R: std::fmt::Debug,
{
    if let Some(transport) = classify_transport(&err) {
        return transport;
    }
    let message = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::ServiceError(service) => match service.into_err() {
            GetShardIteratorError::ResourceNotFoundException(_) => {
                StreamError::ResourceNotFound(message)
            }
            GetShardIteratorError::TrimmedDataAccessException(_) => {
                StreamError::TrimmedDataAccess(message)
            }
            GetShardIteratorError::InternalServerError(_) => StreamError::InternalServer(message),
            _ => StreamError::Other(message),
        },
        _ => StreamError::Other(message),
    }
}

fn classify_get_records<R>(err: SdkError<GetRecordsError, R>) -> StreamError
where
    R: std::fmt::Debug,
{
    if let Some(transport) = classify_transport(&err) {
        return transport;
    }
    let message = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::ServiceError(service) => match service.into_err() {
            GetRecordsError::ExpiredIteratorException(_) => StreamError::ExpiredIterator,
            GetRecordsError::LimitExceededException(_) => StreamError::LimitExceeded(message),
            GetRecordsError::InternalServerError(_) => StreamError::InternalServer(message),
            GetRecordsError::TrimmedDataAccessException(_) => {
                StreamError::TrimmedDataAccess(message)
            }
            GetRecordsError::ResourceNotFoundException(_) => {
                StreamError::ResourceNotFound(message)
            }
            _ => StreamError::Other(message),
        },
        _ => StreamError::Other(message),
    }
}
