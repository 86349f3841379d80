//! Canonicalizers.
//!
//! Pure functions turning engine-reported or caller-declared values into
//! comparable canonical forms. Two semantically equivalent configurations,
//! regardless of which engine reported them or which surface syntax was used,
//! canonicalize to equal values, and canonicalizing a canonical value is a
//! no-op.
//!
//! | Module        | Input                                | Canonical form                  |
//! |---------------|--------------------------------------|---------------------------------|
//! | `volume`      | `src:dst:opts` string, mount record  | `(src, dst, access, propagation)` |
//! | `caps`        | capability list                      | sorted lower-case set           |
//! | `ulimit`      | declared map, runtime list           | `name → (soft, hard)`           |
//! | `dimension`   | number with optional unit suffix     | byte count                      |
//! | `env`         | mapping or `KEY=VALUE` list          | `key → value`                   |
//! | `healthcheck` | seconds-based mapping                | engine field names, nanoseconds |
//! | `command`     | shell string                         | argv                            |
//! | `user`        | user string                          | root variants collapsed         |

pub mod caps;
pub mod command;
pub mod dimension;
pub mod env;
pub mod healthcheck;
pub mod ulimit;
pub mod user;
pub mod volume;

pub use caps::{canonical_caps, capabilities_equivalent};
pub use command::{split_command, whitespace_equal};
pub use dimension::{dimension_values_differ, is_empty_dimensions, to_bytes, validate_dimensions};
pub use env::{desired_environment, parse_env_list};
pub use healthcheck::{canonical_desired_healthcheck, canonical_live_healthcheck, Healthcheck};
pub use ulimit::{Ulimit, UlimitMap};
pub use user::canonical_user;
pub use volume::{Access, CanonicalVolume};
