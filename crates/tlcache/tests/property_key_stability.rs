//! Property-based tests for cache key derivation
//!
//! Equal logical calls must map to byte-identical keys regardless of how the
//! keyword arguments were ordered at the call site.

use std::collections::HashMap;

use proptest::prelude::*;
use tlcache::{CacheArgs, CacheKey, CallArgs, Signature};

fn kwargs_strategy() -> impl Strategy<Value = HashMap<String, i64>> {
    prop::collection::hash_map("[a-z_]{1,8}", any::<i64>(), 0..6)
}

fn with_kwargs<'a>(mut args: CallArgs, kwargs: impl Iterator<Item = (&'a String, &'a i64)>) -> CallArgs {
    for (name, value) in kwargs {
        args.push_kwarg(name.clone(), value);
    }
    args
}

proptest! {
    /// Property: keyword argument order never changes the key
    #[test]
    fn prop_keyword_order_is_irrelevant(
        positional in prop::collection::vec(any::<i64>(), 0..4),
        kwargs in kwargs_strategy(),
    ) {
        let base = positional.iter().fold(CallArgs::new(), |args, value| args.arg(value));

        let mut sorted: Vec<_> = kwargs.iter().collect();
        sorted.sort();
        let forward = with_kwargs(base.clone(), sorted.iter().copied());
        let backward = with_kwargs(base, sorted.iter().rev().copied());

        let sig = Signature::function("f");
        prop_assert_eq!(
            CacheKey::derive(Some("ns"), &sig, &forward),
            CacheKey::derive(Some("ns"), &sig, &backward)
        );
    }

    /// Property: different positional arguments give different keys
    #[test]
    fn prop_positional_arguments_distinguish_calls(
        left in prop::collection::vec(any::<i64>(), 0..5),
        right in prop::collection::vec(any::<i64>(), 0..5),
    ) {
        prop_assume!(left != right);

        let render = |values: &[i64]| {
            values.iter().fold(CallArgs::new(), |args, value| args.arg(value))
        };
        let sig = Signature::function("f");
        prop_assert_ne!(
            CacheKey::derive(None, &sig, &render(&left)),
            CacheKey::derive(None, &sig, &render(&right))
        );
    }

    /// Property: a method's receiver never reaches the key
    #[test]
    fn prop_receiver_is_ignored(receiver in ".*", other in ".*", arg in any::<u32>()) {
        let sig = Signature::method("m");
        prop_assert_eq!(
            CacheKey::derive(None, &sig, &(receiver, arg).cache_args()),
            CacheKey::derive(None, &sig, &(other, arg).cache_args())
        );
    }

    /// Property: derivation is deterministic
    #[test]
    fn prop_derivation_is_deterministic(name in "[a-zA-Z_][a-zA-Z0-9_]{0,12}", a in any::<i32>(), b in ".*") {
        let sig = Signature::function(name);
        let args = (a, b).cache_args();
        prop_assert_eq!(
            CacheKey::derive(Some("ns"), &sig, &args).into_bytes(),
            CacheKey::derive(Some("ns"), &sig, &args).into_bytes()
        );
    }
}
