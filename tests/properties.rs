//! Property-based tests for invariants that should hold over arbitrary
//! input, not just the handful of cases the e2e scenarios exercise.

use lexflow::channel::Channel;
use lexflow::runtime::Scope;
use lexflow::value::Value;
use proptest::prelude::*;

proptest! {
    /// A bounded channel's buffered length never exceeds its declared
    /// capacity, however many sends are attempted.
    #[test]
    fn channel_buffer_never_exceeds_capacity(capacity in 1usize..8, attempts in 0usize..40) {
        let ch = Channel::new(capacity);
        for i in 0..attempts {
            ch.try_send(Value::Int(i as i64));
            prop_assert!(ch.len() <= capacity);
        }
    }

    /// Binding a name in a child scope shadows the parent's binding for
    /// lookups through the child, but never mutates the parent's value;
    /// `set` from the child, conversely, always reaches up to the
    /// nearest scope that already declared the name.
    #[test]
    fn scope_chain_lookup_prefers_nearest_binding(
        parent_value in -1000i64..1000,
        child_value in -1000i64..1000,
        depth in 0usize..5,
    ) {
        let root = Scope::root();
        Scope::bind(&root, "x", Value::Int(parent_value));

        let mut scope = root.clone();
        for _ in 0..depth {
            scope = Scope::child(&scope);
        }
        let leaf = Scope::child(&scope);
        Scope::bind(&leaf, "x", Value::Int(child_value));

        prop_assert_eq!(Scope::lookup(&leaf, "x").unwrap(), Value::Int(child_value));
        prop_assert_eq!(Scope::lookup(&root, "x").unwrap(), Value::Int(parent_value));

        Scope::set(&leaf, "x", Value::Int(parent_value + 1)).unwrap();
        prop_assert_eq!(Scope::lookup(&leaf, "x").unwrap(), Value::Int(parent_value + 1));
        prop_assert_eq!(Scope::lookup(&root, "x").unwrap(), Value::Int(parent_value));
    }
}
