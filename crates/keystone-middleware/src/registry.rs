//! Per-message-type defaulting and validation.
//!
//! Request types opt in at composition time. Lookup is by [`TypeId`], so a
//! message without an entry simply passes through the defaults and
//! validation stages.
//!
//! ```
//! use keystone_core::{Context, Error, KeystoneResult};
//! use keystone_middleware::{Defaults, MessageRegistry, Payload, Validate};
//!
//! struct ListPosts {
//!     limit: i64,
//! }
//!
//! impl Defaults for ListPosts {
//!     fn apply_defaults(&mut self) {
//!         if self.limit == 0 {
//!             self.limit = 20;
//!         }
//!     }
//! }
//!
//! impl Validate for ListPosts {
//!     fn validate(&self, _ctx: &Context) -> KeystoneResult<()> {
//!         if self.limit > 100 {
//!             return Err(Error::validation("limit must not exceed 100"));
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let registry = MessageRegistry::new()
//!     .with_defaults::<ListPosts>()
//!     .with_validated::<ListPosts>();
//!
//! let mut payload = Payload::new(ListPosts { limit: 0 });
//! assert!(registry.apply_defaults(&mut payload));
//! assert_eq!(payload.downcast_ref::<ListPosts>().unwrap().limit, 20);
//! assert!(registry.validate(&Context::new(), &payload).is_ok());
//! ```

use crate::types::Payload;
use keystone_core::{Context, KeystoneResult};
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;

/// A request type that can fill in its own default values.
pub trait Defaults {
    /// Populates unset fields.
    fn apply_defaults(&mut self);
}

/// A request type that can check itself.
pub trait Validate {
    /// Returns a `ValidationFailure` error when the message is unacceptable.
    fn validate(&self, ctx: &Context) -> KeystoneResult<()>;
}

type DefaultsFn = Box<dyn Fn(&mut (dyn Any + Send + Sync)) + Send + Sync>;
type ValidatorFn = Box<dyn Fn(&Context, &(dyn Any + Send + Sync)) -> KeystoneResult<()> + Send + Sync>;

struct Entry<F> {
    type_name: &'static str,
    run: F,
}

/// Maps request types to their defaulting and validation functions.
#[derive(Default)]
pub struct MessageRegistry {
    defaults: HashMap<TypeId, Entry<DefaultsFn>>,
    validators: HashMap<TypeId, Entry<ValidatorFn>>,
}

impl MessageRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T`'s [`Defaults`] implementation.
    #[must_use]
    pub fn with_defaults<T>(mut self) -> Self
    where
        T: Defaults + Any + Send + Sync,
    {
        self.defaults.insert(
            TypeId::of::<T>(),
            Entry {
                type_name: type_name::<T>(),
                run: Box::new(|message: &mut (dyn Any + Send + Sync)| {
                    if let Some(message) = message.downcast_mut::<T>() {
                        message.apply_defaults();
                    }
                }),
            },
        );
        self
    }

    /// Registers `T`'s [`Validate`] implementation.
    #[must_use]
    pub fn with_validated<T>(self) -> Self
    where
        T: Validate + Any + Send + Sync,
    {
        self.with_validator::<T, _>(|ctx, message| message.validate(ctx))
    }

    /// Registers a validation function for `T`, replacing any earlier one.
    #[must_use]
    pub fn with_validator<T, F>(mut self, validator: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Context, &T) -> KeystoneResult<()> + Send + Sync + 'static,
    {
        self.validators.insert(
            TypeId::of::<T>(),
            Entry {
                type_name: type_name::<T>(),
                run: Box::new(move |ctx: &Context, message: &(dyn Any + Send + Sync)| {
                    match message.downcast_ref::<T>() {
                        Some(message) => validator(ctx, message),
                        None => Ok(()),
                    }
                }),
            },
        );
        self
    }

    /// Returns `true` if `T` has a validator.
    #[must_use]
    pub fn has_validator<T: Any>(&self) -> bool {
        self.validators.contains_key(&TypeId::of::<T>())
    }

    /// Applies defaults to the payload. Returns `true` if a defaulting
    /// function ran.
    pub fn apply_defaults(&self, payload: &mut Payload) -> bool {
        let Payload::Message(message) = payload else {
            return false;
        };
        let Some(entry) = self.defaults.get(&(**message).type_id()) else {
            return false;
        };
        (entry.run)(&mut **message);
        true
    }

    /// Validates the payload. Messages without a validator pass.
    pub fn validate(&self, ctx: &Context, payload: &Payload) -> KeystoneResult<()> {
        let Payload::Message(message) = payload else {
            return Ok(());
        };
        match self.validators.get(&(**message).type_id()) {
            Some(entry) => (entry.run)(ctx, &**message),
            None => Ok(()),
        }
    }

    /// Returns the type name registered for the payload's validator.
    pub(crate) fn validator_name(&self, payload: &Payload) -> Option<&'static str> {
        payload
            .message_type()
            .and_then(|id| self.validators.get(&id))
            .map(|entry| entry.type_name)
    }
}

impl fmt::Debug for MessageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut defaults: Vec<_> = self.defaults.values().map(|e| e.type_name).collect();
        let mut validators: Vec<_> = self.validators.values().map(|e| e.type_name).collect();
        defaults.sort_unstable();
        validators.sort_unstable();
        f.debug_struct("MessageRegistry")
            .field("defaults", &defaults)
            .field("validators", &validators)
            .finish()
    }
}
