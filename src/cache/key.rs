//! Cache Keys
//!
//! A key is an operation identity plus the ordered argument values of one
//! call. Each argument carries a content fingerprint (BLAKE3 of its JSON
//! encoding) and its serialized length.
//!
//! # Equality
//!
//! Per argument, first match wins:
//!
//! 1. either side opted into [`CacheEquals`]: equal only if both did with
//!    the same type and `cache_equals` holds
//! 2. both are plain values of the same type: `==` decides
//! 3. otherwise: equal iff fingerprints match
//!
//! The key hash combines the operation with `cache_hash` for custom
//! arguments and the fingerprint for every other argument, so any two
//! arguments that can compare equal hash alike. Plain values therefore
//! must serialize identically whenever they are `==`; a type that breaks
//! this only loses hits, never returns a wrong entry.

use serde::Serialize;
use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Custom argument equality
///
/// Arguments built with [`Arg::custom`] compare only through this trait and
/// never equal an argument of another kind or type.
pub trait CacheEquals {
    fn cache_equals(&self, other: &Self) -> bool;

    /// Feed whatever `cache_equals` compares into the key hash.
    ///
    /// The default hashes nothing, which is always consistent.
    fn cache_hash(&self, _state: &mut dyn Hasher) {}
}

/// Content hash of an argument's canonical serialization
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(blake3::Hash);

impl Fingerprint {
    fn of<T: Serialize + fmt::Debug + ?Sized>(value: &T) -> (Self, usize) {
        match serde_json::to_vec(value) {
            Ok(encoded) => (Self(blake3::hash(&encoded)), encoded.len()),
            // Unserializable arguments fall back to their Debug rendering
            Err(_) => {
                let rendered = format!("{:?}", value);
                (Self(blake3::hash(rendered.as_bytes())), rendered.len())
            }
        }
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

// =============================================================================
// Type-erased argument values
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgKind {
    Plain,
    Custom,
    Opaque,
}

trait ArgValue: Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;

    fn kind(&self) -> ArgKind;

    /// Feed the custom hash; returns false for non-custom values
    fn custom_hash(&self, _state: &mut dyn Hasher) -> bool {
        false
    }

    fn custom_eq(&self, _other: &dyn ArgValue) -> Option<bool> {
        None
    }

    fn structural_eq(&self, _other: &dyn ArgValue) -> Option<bool> {
        None
    }
}

struct Plain<T>(T);

impl<T> fmt::Debug for Plain<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl<T> ArgValue for Plain<T>
where
    T: Eq + fmt::Debug + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        &self.0
    }

    fn kind(&self) -> ArgKind {
        ArgKind::Plain
    }

    fn structural_eq(&self, other: &dyn ArgValue) -> Option<bool> {
        other.as_any().downcast_ref::<T>().map(|o| self.0 == *o)
    }
}

struct Custom<T>(T);

impl<T> fmt::Debug for Custom<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl<T> ArgValue for Custom<T>
where
    T: CacheEquals + fmt::Debug + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        &self.0
    }

    fn kind(&self) -> ArgKind {
        ArgKind::Custom
    }

    fn custom_hash(&self, state: &mut dyn Hasher) -> bool {
        self.0.cache_hash(state);
        true
    }

    fn custom_eq(&self, other: &dyn ArgValue) -> Option<bool> {
        other
            .as_any()
            .downcast_ref::<T>()
            .map(|o| self.0.cache_equals(o))
    }
}

struct Opaque<T>(T);

impl<T> fmt::Debug for Opaque<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl<T> ArgValue for Opaque<T>
where
    T: fmt::Debug + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        &self.0
    }

    fn kind(&self) -> ArgKind {
        ArgKind::Opaque
    }
}

// =============================================================================
// Arg
// =============================================================================

/// One argument of a cached call
#[derive(Clone)]
pub struct Arg {
    value: Arc<dyn ArgValue>,
    fingerprint: Fingerprint,
    serialized_len: usize,
}

impl Arg {
    /// Argument compared with `==` against values of the same type
    pub fn new<T>(value: T) -> Self
    where
        T: Eq + Serialize + fmt::Debug + Send + Sync + 'static,
    {
        let (fingerprint, serialized_len) = Fingerprint::of(&value);
        Self {
            value: Arc::new(Plain(value)),
            fingerprint,
            serialized_len,
        }
    }

    /// Argument compared with its [`CacheEquals`] implementation
    pub fn custom<T>(value: T) -> Self
    where
        T: CacheEquals + Serialize + fmt::Debug + Send + Sync + 'static,
    {
        let (fingerprint, serialized_len) = Fingerprint::of(&value);
        Self {
            value: Arc::new(Custom(value)),
            fingerprint,
            serialized_len,
        }
    }

    /// Argument with no usable equality; compared by fingerprint only
    pub fn opaque<T>(value: T) -> Self
    where
        T: Serialize + fmt::Debug + Send + Sync + 'static,
    {
        let (fingerprint, serialized_len) = Fingerprint::of(&value);
        Self {
            value: Arc::new(Opaque(value)),
            fingerprint,
            serialized_len,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn serialized_len(&self) -> usize {
        self.serialized_len
    }

    /// Borrow the argument as its concrete type
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.as_any().downcast_ref::<T>()
    }

    fn hash_into(&self, state: &mut dyn Hasher) {
        if !self.value.custom_hash(state) {
            state.write(self.fingerprint.0.as_bytes());
        }
    }
}

impl PartialEq for Arg {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = (self.value.as_ref(), other.value.as_ref());
        let same_fingerprint = self.fingerprint == other.fingerprint;

        match (a.kind(), b.kind()) {
            (ArgKind::Custom, ArgKind::Custom) => a.custom_eq(b).unwrap_or(false),
            (ArgKind::Custom, _) | (_, ArgKind::Custom) => false,
            // The fingerprint check keeps `==` inside the hash's equivalence
            (ArgKind::Plain, ArgKind::Plain) => match a.structural_eq(b) {
                Some(equal) => equal && same_fingerprint,
                None => same_fingerprint,
            },
            _ => same_fingerprint,
        }
    }
}

impl Eq for Arg {}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.value, f)
    }
}

// =============================================================================
// CacheKey
// =============================================================================

/// Identity of one memoized call
#[derive(Clone)]
pub struct CacheKey {
    operation: Arc<str>,
    args: Arc<[Arg]>,
    serialized_len: usize,
    /// Pre-computed from the operation and per-argument hashes
    hash: u64,
}

impl CacheKey {
    pub fn new(operation: impl Into<Arc<str>>, args: Vec<Arg>) -> Self {
        let operation = operation.into();

        let mut hasher = DefaultHasher::new();
        operation.hash(&mut hasher);
        for arg in &args {
            arg.hash_into(&mut hasher);
        }

        let serialized_len = args.iter().map(Arg::serialized_len).sum();

        Self {
            operation,
            args: args.into(),
            serialized_len,
            hash: hasher.finish(),
        }
    }

    #[inline]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    #[inline]
    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    /// Summed serialized length of all arguments
    #[inline]
    pub fn serialized_len(&self) -> usize {
        self.serialized_len
    }

    /// Estimated in-memory cost of the key
    #[inline]
    pub fn estimated_bytes(&self) -> u64 {
        self.serialized_len as u64 * 2
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.operation == other.operation
            && self.args.len() == other.args.len()
            && self.args.iter().zip(other.args.iter()).all(|(a, b)| a == b)
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.operation)?;
        f.debug_list().entries(self.args.iter()).finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
