//! Cache key derivation
//!
//! A memoized call is identified by an optional namespace, the wrapped
//! function's [`Signature`], and its rendered arguments. All parts are joined
//! with `:` and UTF-8 encoded into a [`CacheKey`]:
//!
//! ```text
//! [namespace|]name:arg0:arg1:kw_a,1:kw_b,2
//! ```
//!
//! Keyword arguments are ordered by name, so call-site ordering never changes
//! the key.

use std::{collections::BTreeMap, fmt};

const PART_DELIMITER: char = ':';
const NAMESPACE_DELIMITER: char = '|';
const KEYWORD_DELIMITER: char = ',';

/// Opaque cache key bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Vec<u8>);

impl CacheKey {
    /// Derive the key of a logical call
    pub fn derive(namespace: Option<&str>, signature: &Signature, args: &CallArgs) -> Self {
        let mut key = match namespace {
            Some(ns) if !ns.is_empty() => {
                format!("{}{}{}", ns, NAMESPACE_DELIMITER, signature.name())
            }
            _ => signature.name().to_string(),
        };

        let skip = usize::from(signature.has_receiver());
        for arg in args.positional.iter().skip(skip) {
            key.push(PART_DELIMITER);
            key.push_str(arg);
        }

        for (name, value) in &args.keyword {
            key.push(PART_DELIMITER);
            key.push_str(name);
            key.push(KEYWORD_DELIMITER);
            key.push_str(value);
        }

        Self(key.into_bytes())
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume the key, returning its bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self(key.as_bytes().to_vec())
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(key.into_bytes())
    }
}

impl From<Vec<u8>> for CacheKey {
    fn from(key: Vec<u8>) -> Self {
        Self(key)
    }
}

impl AsRef<[u8]> for CacheKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Identity of a memoized function
///
/// A method signature marks its first positional argument as the receiver;
/// the receiver identifies an instance rather than logical input, so it is
/// left out of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    name: String,
    receiver: bool,
}

impl Signature {
    /// A free function (or a literal name standing in for one)
    pub fn function(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            receiver: false,
        }
    }

    /// A method whose first positional argument is its receiver
    pub fn method(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            receiver: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_receiver(&self) -> bool {
        self.receiver
    }
}

impl From<&str> for Signature {
    fn from(name: &str) -> Self {
        Self::function(name)
    }
}

impl From<String> for Signature {
    fn from(name: String) -> Self {
        Self::function(name)
    }
}

/// Rendered arguments of a call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallArgs {
    positional: Vec<String>,
    keyword: BTreeMap<String, String>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument
    pub fn arg(mut self, value: impl fmt::Display) -> Self {
        self.push_arg(value);
        self
    }

    /// Set a keyword argument, replacing any earlier value under the same name
    pub fn kwarg(mut self, name: impl Into<String>, value: impl fmt::Display) -> Self {
        self.push_kwarg(name, value);
        self
    }

    pub fn push_arg(&mut self, value: impl fmt::Display) {
        self.positional.push(value.to_string());
    }

    pub fn push_kwarg(&mut self, name: impl Into<String>, value: impl fmt::Display) {
        self.keyword.insert(name.into(), value.to_string());
    }

    pub fn positional(&self) -> &[String] {
        &self.positional
    }

    /// Keyword arguments, ordered by name
    pub fn keyword(&self) -> impl Iterator<Item = (&str, &str)> {
        self.keyword.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Arguments that can be rendered into a cache key
pub trait CacheArgs {
    fn cache_args(&self) -> CallArgs;
}

impl CacheArgs for CallArgs {
    fn cache_args(&self) -> CallArgs {
        self.clone()
    }
}

impl CacheArgs for () {
    fn cache_args(&self) -> CallArgs {
        CallArgs::new()
    }
}

macro_rules! impl_cache_args_for_tuple {
    ($($name:ident),+) => {
        impl<$($name: fmt::Display),+> CacheArgs for ($($name,)+) {
            #[allow(non_snake_case)]
            fn cache_args(&self) -> CallArgs {
                let ($($name,)+) = self;
                let mut args = CallArgs::new();
                $(args.push_arg($name);)+
                args
            }
        }
    };
}

impl_cache_args_for_tuple!(A);
impl_cache_args_for_tuple!(A, B);
impl_cache_args_for_tuple!(A, B, C);
impl_cache_args_for_tuple!(A, B, C, D);
impl_cache_args_for_tuple!(A, B, C, D, E);
impl_cache_args_for_tuple!(A, B, C, D, E, G);
