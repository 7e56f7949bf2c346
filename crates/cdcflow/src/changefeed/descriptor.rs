use serde::{Deserialize, Serialize};
use std::fmt;

use crate::catalog::{QualifiedName, TableId, TableRef};
use crate::changefeed::alter::AlterationDelta;
use crate::changefeed::options::{self, Format, OptionBag};
use crate::changefeed::redact::{redact_option_value, redact_statement};
use crate::changefeed::sink::SinkAddress;
use crate::changefeed::statement::{render_create, StatementTemplate};
use crate::changefeed::targets::{RenderedTargets, TargetSet};
use crate::errors::ChangefeedError;
use crate::jobs::model::{JobId, JobStatus};

/// Mutable configuration of one changefeed job.
///
/// Fields are private: after construction the only way to change a
/// descriptor is [`ChangefeedDescriptor::apply_alteration`], which either
/// applies a whole delta or leaves the descriptor untouched.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangefeedDescriptor {
    job_id: JobId,
    targets: TargetSet,
    sink: SinkAddress,
    format: Format,
    options: OptionBag,
    statement: StatementTemplate,
}

impl ChangefeedDescriptor {
    /// `written` holds the table names as the user typed them, in order;
    /// `tables` the resolved tables.
    pub fn new(
        job_id: JobId,
        written: Vec<String>,
        tables: Vec<TableRef>,
        sink: SinkAddress,
        options: OptionBag,
    ) -> Result<Self, ChangefeedError> {
        let mut targets = TargetSet::new();
        for t in tables {
            targets.add(t.id, t.name);
        }
        if targets.is_empty() {
            return Err(ChangefeedError::EmptyTargetSet(job_id));
        }
        options::validate_compatibility(&options, sink.kind())?;

        Ok(Self {
            job_id,
            targets,
            format: options::format_of(&options),
            sink,
            options,
            statement: StatementTemplate { targets: written },
        })
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn targets(&self) -> &TargetSet {
        &self.targets
    }

    pub fn sink(&self) -> &SinkAddress {
        &self.sink
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn options(&self) -> &OptionBag {
        &self.options
    }

    pub fn statement(&self) -> &StatementTemplate {
        &self.statement
    }

    /// Applies every part of `delta` or nothing. Requires the job to be
    /// paused.
    pub fn apply_alteration(
        &mut self,
        status: JobStatus,
        delta: &AlterationDelta,
    ) -> Result<(), ChangefeedError> {
        if status != JobStatus::Paused {
            return Err(ChangefeedError::InvalidState {
                job_id: self.job_id,
                status,
                reason: "must pause before altering",
            });
        }

        let mut next = self.clone();

        for id in &delta.drop {
            next.targets.remove(*id)?;
        }
        for table in &delta.add {
            next.targets.add(table.id, table.name.clone());
        }
        if next.targets.is_empty() {
            return Err(ChangefeedError::EmptyTargetSet(self.job_id));
        }

        for (name, value) in &delta.set_options {
            next.options.insert(name.clone(), value.clone());
        }
        for name in &delta.unset_options {
            next.options.remove(name);
        }

        if let Some(sink) = &delta.sink {
            if sink.scheme() != next.sink.scheme() {
                return Err(ChangefeedError::InvalidSink(format!(
                    "cannot change sink type from {} to {}",
                    next.sink.scheme(),
                    sink.scheme()
                )));
            }
            next.sink = sink.clone();
        }

        options::validate_compatibility(&next.options, next.sink.kind())?;
        next.format = options::format_of(&next.options);

        if !delta.add.is_empty() || !delta.drop.is_empty() {
            next.statement.targets = next.render_targets(|_| None).names;
        }

        *self = next;
        Ok(())
    }

    pub fn render_targets<F>(&self, resolve: F) -> RenderedTargets
    where
        F: Fn(TableId) -> Option<QualifiedName>,
    {
        self.targets.render_with(
            self.sink.kind(),
            &options::topic_naming(&self.options),
            resolve,
        )
    }

    /// The creation statement rebuilt from the current configuration, with
    /// credentials redacted.
    pub fn render_description(&self) -> String {
        redact_statement(&render_create(
            &self.statement.targets,
            self.sink.expose(),
            &self.options,
        ))
    }
}

impl fmt::Debug for ChangefeedDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let options: Vec<(&String, Option<String>)> = self
            .options
            .iter()
            .map(|(k, v)| (k, v.as_deref().map(|v| redact_option_value(k, v))))
            .collect();

        f.debug_struct("ChangefeedDescriptor")
            .field("job_id", &self.job_id)
            .field("targets", &self.targets)
            .field("sink", &self.sink)
            .field("format", &self.format)
            .field("options", &options)
            .field("statement", &self.statement)
            .finish()
    }
}
