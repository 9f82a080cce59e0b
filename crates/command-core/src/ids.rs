//! Identifier generation.
//!
//! `commandId` and `leaseId` are server-generated with negligible collision
//! probability; a v4 UUID's 122 bits of randomness is exactly the width the
//! spec asks for, so we use it directly rather than hand-rolling a random
//! string generator.

use uuid::Uuid;

pub fn new_command_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn new_lease_id() -> String {
    Uuid::new_v4().to_string()
}
