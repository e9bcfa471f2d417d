//! Load requests and their validation.

use busbar_sf_jobs::{CreateJobRequest, Operation, Record};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};

/// Records destined for one object, loaded with one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadRequest {
    pub object_name: String,
    pub operation: Operation,
    /// Required for, and only for, upserts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id_field: Option<String>,
    /// Process this object's batches strictly in submission order.
    #[serde(default)]
    pub serial_mode: bool,
    pub records: Vec<Record>,
}

impl LoadRequest {
    pub fn new(object_name: impl Into<String>, operation: Operation) -> Self {
        Self {
            object_name: object_name.into(),
            operation,
            external_id_field: None,
            serial_mode: false,
            records: Vec::new(),
        }
    }

    pub fn with_external_id_field(mut self, field: impl Into<String>) -> Self {
        self.external_id_field = Some(field.into());
        self
    }

    pub fn with_serial_mode(mut self, serial: bool) -> Self {
        self.serial_mode = serial;
        self
    }

    pub fn with_records(mut self, records: impl IntoIterator<Item = Record>) -> Self {
        self.records.extend(records);
        self
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    /// The job this request is loaded through.
    pub fn job_request(&self) -> CreateJobRequest {
        let mut request = CreateJobRequest::new(&self.object_name, self.operation)
            .with_serial_mode(self.serial_mode);
        if let Some(field) = &self.external_id_field {
            request = request.with_external_id_field(field);
        }
        request
    }

    /// Checks that depend on this request alone.
    pub fn validate(&self) -> Result<()> {
        let object = Some(self.object_name.as_str());

        if self.object_name.trim().is_empty() {
            return Err(Error::validation(None, "object name must not be empty"));
        }
        if self.operation.is_query() {
            return Err(Error::validation(
                object,
                format!("{} is a query operation and cannot be loaded", self.operation),
            ));
        }

        match (&self.external_id_field, self.operation.requires_external_id()) {
            (None, true) => {
                return Err(Error::validation(
                    object,
                    "upsert requires an external id field",
                ))
            }
            (Some(field), false) => {
                return Err(Error::validation(
                    object,
                    format!(
                        "external id field {field} is only allowed for upsert, not {}",
                        self.operation
                    ),
                ))
            }
            (Some(field), true) if field.trim().is_empty() => {
                return Err(Error::validation(object, "external id field must not be empty"))
            }
            _ => {}
        }

        if self.records.is_empty() {
            return Err(Error::validation(object, "records must not be empty"));
        }

        let mut seen = HashSet::with_capacity(self.records.len());
        for record in &self.records {
            if record.client_row_id.is_empty() {
                return Err(Error::validation(object, "client_row_id must not be empty"));
            }
            if !seen.insert(record.client_row_id.as_str()) {
                return Err(Error::validation(
                    object,
                    format!("duplicate client_row_id {}", record.client_row_id),
                ));
            }
            if let Some(field) = &self.external_id_field {
                if record.string_like(field).is_none() {
                    return Err(Error::validation(
                        object,
                        format!(
                            "record {} needs a string value for external id field {field}",
                            record.client_row_id
                        ),
                    ));
                }
            }
            for lookup in &record.lookups {
                if lookup.field_name.trim().is_empty() {
                    return Err(Error::validation(
                        object,
                        format!("record {} has a lookup without a field name", record.client_row_id),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Validate a whole submission before anything is sent.
pub(crate) fn validate_submission(requests: &[LoadRequest]) -> Result<()> {
    let mut rows_by_object: HashMap<&str, HashSet<&str>> = HashMap::new();
    for request in requests {
        request.validate()?;
        let rows = request
            .records
            .iter()
            .map(|r| r.client_row_id.as_str())
            .collect();
        if rows_by_object
            .insert(request.object_name.as_str(), rows)
            .is_some()
        {
            return Err(Error::validation(
                Some(&request.object_name),
                "object appears in more than one request",
            ));
        }
    }

    for request in requests {
        for record in &request.records {
            for lookup in &record.lookups {
                let Some(rows) = rows_by_object.get(lookup.target_object.as_str()) else {
                    return Err(Error::validation(
                        Some(&request.object_name),
                        format!(
                            "record {} references {}, which is not part of this load",
                            record.client_row_id, lookup.target_object
                        ),
                    ));
                };
                if !rows.contains(lookup.target_client_row_id.as_str()) {
                    return Err(Error::validation(
                        Some(&request.object_name),
                        format!(
                            "record {} references unknown {} row {}",
                            record.client_row_id, lookup.target_object, lookup.target_client_row_id
                        ),
                    ));
                }
            }
        }
    }

    Ok(())
}
