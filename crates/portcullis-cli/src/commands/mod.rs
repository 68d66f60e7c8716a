//! CLI subcommands.

#[expect(
    unreachable_pub,
    reason = "binary crate, pub inside a private module"
)]
pub mod admit;
#[expect(
    unreachable_pub,
    reason = "binary crate, pub inside a private module"
)]
pub mod check_policy;
#[expect(
    unreachable_pub,
    reason = "binary crate, pub inside a private module"
)]
pub mod inspect;
