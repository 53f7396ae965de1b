// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-category callback bindings.
//!
//! A binding is a callback plus the opaque context it is invoked with. A
//! category is either fully bound or unbound; an unbound category drops its
//! events silently.
//!
//! # Example
//!
//! ```
//! use hdds_discovery_bridge::callbacks::{CallbackContext, CallbackRegistry};
//! use hdds_discovery_bridge::records::ParticipantRecord;
//! use std::sync::Arc;
//!
//! let ctx: CallbackContext = Arc::new(String::from("host"));
//! let mut registry = CallbackRegistry::new();
//! registry
//!     .set_participant_discovered(
//!         Some(Arc::new(|record: ParticipantRecord, ctx: &CallbackContext| {
//!             let host = ctx.downcast_ref::<String>().unwrap();
//!             println!("{} saw {}", host, record.guid_prefix);
//!         })),
//!         Some(ctx),
//!     )
//!     .unwrap();
//! ```

use crate::error::BridgeError;
use crate::records::{ParticipantRecord, ReaderRecord, WriterRecord};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Opaque host context passed back to every invocation of a binding.
pub type CallbackContext = Arc<dyn Any + Send + Sync>;

pub type ParticipantCallback = Arc<dyn Fn(ParticipantRecord, &CallbackContext) + Send + Sync>;
pub type ReaderCallback = Arc<dyn Fn(ReaderRecord, &CallbackContext) + Send + Sync>;
pub type WriterCallback = Arc<dyn Fn(WriterRecord, &CallbackContext) + Send + Sync>;

/// Event categories a host can bind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventCategory {
    ParticipantDiscovered,
    ParticipantRemoved,
    ReaderDiscovered,
    ReaderRemoved,
    WriterDiscovered,
    WriterRemoved,
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ParticipantDiscovered => "participant-discovered",
            Self::ParticipantRemoved => "participant-removed",
            Self::ReaderDiscovered => "reader-discovered",
            Self::ReaderRemoved => "reader-removed",
            Self::WriterDiscovered => "writer-discovered",
            Self::WriterRemoved => "writer-removed",
        };
        f.write_str(s)
    }
}

/// Callback plus its context. Never exists half-configured.
pub struct CallbackBinding<R> {
    callback: Arc<dyn Fn(R, &CallbackContext) + Send + Sync>,
    context: CallbackContext,
}

impl<R> CallbackBinding<R> {
    pub fn new(
        callback: Arc<dyn Fn(R, &CallbackContext) + Send + Sync>,
        context: CallbackContext,
    ) -> Self {
        Self { callback, context }
    }

    pub fn invoke(&self, record: R) {
        (self.callback)(record, &self.context);
    }

    pub fn context(&self) -> &CallbackContext {
        &self.context
    }
}

impl<R> Clone for CallbackBinding<R> {
    fn clone(&self) -> Self {
        Self {
            callback: self.callback.clone(),
            context: self.context.clone(),
        }
    }
}

/// Bindings for all six categories.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    participant_discovered: Option<CallbackBinding<ParticipantRecord>>,
    participant_removed: Option<CallbackBinding<ParticipantRecord>>,
    reader_discovered: Option<CallbackBinding<ReaderRecord>>,
    reader_removed: Option<CallbackBinding<ReaderRecord>>,
    writer_discovered: Option<CallbackBinding<WriterRecord>>,
    writer_removed: Option<CallbackBinding<WriterRecord>>,
}

/// Validate a {callback, context} pair.
///
/// `(None, _)` clears the binding; `(Some, None)` is a contract violation.
fn bind<R>(
    category: EventCategory,
    callback: Option<Arc<dyn Fn(R, &CallbackContext) + Send + Sync>>,
    context: Option<CallbackContext>,
) -> Result<Option<CallbackBinding<R>>, BridgeError> {
    match (callback, context) {
        (Some(callback), Some(context)) => Ok(Some(CallbackBinding::new(callback, context))),
        (Some(_), None) => Err(BridgeError::ContractViolation(format!(
            "{} callback bound without a context",
            category
        ))),
        (None, _) => Ok(None),
    }
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_participant_discovered(
        &mut self,
        callback: Option<ParticipantCallback>,
        context: Option<CallbackContext>,
    ) -> Result<(), BridgeError> {
        self.participant_discovered =
            bind(EventCategory::ParticipantDiscovered, callback, context)?;
        Ok(())
    }

    pub fn set_participant_removed(
        &mut self,
        callback: Option<ParticipantCallback>,
        context: Option<CallbackContext>,
    ) -> Result<(), BridgeError> {
        self.participant_removed = bind(EventCategory::ParticipantRemoved, callback, context)?;
        Ok(())
    }

    pub fn set_reader_discovered(
        &mut self,
        callback: Option<ReaderCallback>,
        context: Option<CallbackContext>,
    ) -> Result<(), BridgeError> {
        self.reader_discovered = bind(EventCategory::ReaderDiscovered, callback, context)?;
        Ok(())
    }

    pub fn set_reader_removed(
        &mut self,
        callback: Option<ReaderCallback>,
        context: Option<CallbackContext>,
    ) -> Result<(), BridgeError> {
        self.reader_removed = bind(EventCategory::ReaderRemoved, callback, context)?;
        Ok(())
    }

    pub fn set_writer_discovered(
        &mut self,
        callback: Option<WriterCallback>,
        context: Option<CallbackContext>,
    ) -> Result<(), BridgeError> {
        self.writer_discovered = bind(EventCategory::WriterDiscovered, callback, context)?;
        Ok(())
    }

    pub fn set_writer_removed(
        &mut self,
        callback: Option<WriterCallback>,
        context: Option<CallbackContext>,
    ) -> Result<(), BridgeError> {
        self.writer_removed = bind(EventCategory::WriterRemoved, callback, context)?;
        Ok(())
    }

    pub fn participant_discovered(&self) -> Option<&CallbackBinding<ParticipantRecord>> {
        self.participant_discovered.as_ref()
    }

    pub fn participant_removed(&self) -> Option<&CallbackBinding<ParticipantRecord>> {
        self.participant_removed.as_ref()
    }

    pub fn reader_discovered(&self) -> Option<&CallbackBinding<ReaderRecord>> {
        self.reader_discovered.as_ref()
    }

    pub fn reader_removed(&self) -> Option<&CallbackBinding<ReaderRecord>> {
        self.reader_removed.as_ref()
    }

    pub fn writer_discovered(&self) -> Option<&CallbackBinding<WriterRecord>> {
        self.writer_discovered.as_ref()
    }

    pub fn writer_removed(&self) -> Option<&CallbackBinding<WriterRecord>> {
        self.writer_removed.as_ref()
    }

    pub fn is_bound(&self, category: EventCategory) -> bool {
        match category {
            EventCategory::ParticipantDiscovered => self.participant_discovered.is_some(),
            EventCategory::ParticipantRemoved => self.participant_removed.is_some(),
            EventCategory::ReaderDiscovered => self.reader_discovered.is_some(),
            EventCategory::ReaderRemoved => self.reader_removed.is_some(),
            EventCategory::WriterDiscovered => self.writer_discovered.is_some(),
            EventCategory::WriterRemoved => self.writer_removed.is_some(),
        }
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("participant_discovered", &self.participant_discovered.is_some())
            .field("participant_removed", &self.participant_removed.is_some())
            .field("reader_discovered", &self.reader_discovered.is_some())
            .field("reader_removed", &self.reader_removed.is_some())
            .field("writer_discovered", &self.writer_discovered.is_some())
            .field("writer_removed", &self.writer_removed.is_some())
            .finish()
    }
}
