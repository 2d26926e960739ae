//! Change masks accumulated on tracker entities.
//!
//! Mutators OR bits into the mask; consumers read-and-clear it with
//! `drain`. A bit observed in a drained mask means the corresponding
//! aspect changed at least once since the previous drain.

macro_rules! change_mask {
    ($(#[$doc:meta])* $name:ident { $($(#[$bit_doc:meta])* $bit:ident = $value:expr;)* }) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
        pub struct $name(u32);

        impl $name {
            $(
                $(#[$bit_doc])*
                pub const $bit: $name = $name($value);
            )*

            /// Creates an empty mask.
            pub const fn empty() -> Self {
                Self(0)
            }

            /// Returns true when no bit is set.
            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// Adds the bits of `other` to this mask.
            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            /// Returns true when every bit of `other` is set.
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// Reads the mask and clears it.
            pub fn drain(&mut self) -> Self {
                std::mem::take(self)
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;

            fn bitor(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, other: Self) {
                self.0 |= other.0;
            }
        }
    };
}

change_mask! {
    /// Changes observed on a remote node.
    RemoteNodeChanges {
        /// The node kind was determined or changed.
        KIND = 1 << 0;
        /// The node's process instance id changed.
        INSTANCE_ID = 1 << 1;
        /// The node's host id changed.
        HOST_ID = 1 << 2;
        /// Descriptive endpoint information changed.
        ENDPOINT_INFO = 1 << 3;
        /// The node subscribed to new message types.
        METHODS_ADDED = 1 << 4;
        /// The node unsubscribed from message types.
        METHODS_REMOVED = 1 << 5;
        /// The node started responding to pings.
        STARTED_RESPONDING = 1 << 6;
        /// The node stopped responding to pings.
        STOPPED_RESPONDING = 1 << 7;
        /// The ping response rate changed.
        RESPONSE_RATE = 1 << 8;
        /// Information about the node's connections changed.
        CONNECTION_INFO = 1 << 9;
        /// Traffic statistics of the node were updated.
        STATISTICS = 1 << 10;
    }
}

change_mask! {
    /// Changes observed on a remote process instance.
    RemoteInstanceChanges {
        /// The instance started responding.
        STARTED_RESPONDING = 1 << 0;
        /// The instance stopped responding.
        STOPPED_RESPONDING = 1 << 1;
        /// The application name or other description changed.
        APPLICATION_INFO = 1 << 2;
        /// The instance's host id changed.
        HOST_ID = 1 << 3;
    }
}

change_mask! {
    /// Changes observed on a remote host.
    RemoteHostChanges {
        /// The host name changed.
        HOSTNAME = 1 << 0;
        /// Fixed hardware configuration values changed.
        HARDWARE_CONFIG = 1 << 1;
        /// Measured sensor values changed.
        SENSOR_VALUES = 1 << 2;
        /// The host started responding.
        STARTED_RESPONDING = 1 << 3;
        /// The host stopped responding.
        STOPPED_RESPONDING = 1 << 4;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_mask_accumulates() {
        let mut changes = RemoteNodeChanges::empty();
        assert!(changes.is_empty());

        changes |= RemoteNodeChanges::KIND;
        changes.insert(RemoteNodeChanges::METHODS_ADDED);
        assert!(changes.contains(RemoteNodeChanges::KIND));
        assert!(changes.contains(RemoteNodeChanges::KIND | RemoteNodeChanges::METHODS_ADDED));
        assert!(!changes.contains(RemoteNodeChanges::STATISTICS));
    }

    #[test]
    fn test_change_mask_drain_resets() {
        let mut changes = RemoteHostChanges::empty();
        changes |= RemoteHostChanges::HOSTNAME;
        changes |= RemoteHostChanges::SENSOR_VALUES;

        let drained = changes.drain();
        assert!(drained.contains(RemoteHostChanges::HOSTNAME));
        assert!(drained.contains(RemoteHostChanges::SENSOR_VALUES));
        assert!(changes.is_empty());
    }
}
