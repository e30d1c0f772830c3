//! Identity types for the pipeline system.
//!
//! `ModuleId` and `ConnectionId` are newtypes over `u32` that serve as direct
//! array indices into the graph's storage vectors. `SubscriptionId` is a
//! monotonically increasing handle issued by the subscription registry and is
//! never reused within one engine.

use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub const INVALID: $name = $name(u32::MAX);

            #[inline]
            pub fn is_valid(self) -> bool {
                self != Self::INVALID
            }

            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if *self == Self::INVALID {
                    write!(f, concat!(stringify!($name), "(INVALID)"))
                } else {
                    write!(f, concat!(stringify!($name), "({})"), self.0)
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        }
    };
}

define_id!(
    /// Index into `Graph::modules`.
    ModuleId
);

define_id!(
    /// Index into `Graph::connections`.
    ConnectionId
);

define_id!(
    /// Handle for a tap issued by the subscription registry.
    SubscriptionId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_id() {
        let id = ModuleId(42);
        assert!(id.is_valid());
        assert_eq!(id.index(), 42);
        assert!(!ModuleId::INVALID.is_valid());
    }

    #[test]
    fn test_connection_id_debug() {
        assert_eq!(format!("{:?}", ConnectionId(5)), "ConnectionId(5)");
        assert_eq!(
            format!("{:?}", ConnectionId::INVALID),
            "ConnectionId(INVALID)"
        );
    }

    #[test]
    fn test_subscription_id_ordering() {
        assert!(SubscriptionId(1) < SubscriptionId(2));
        assert_eq!(SubscriptionId(3).to_string(), "SubscriptionId(3)");
    }
}
