//! Built-in license policy, seeded into an empty policy table.

use super::types::{LicensePolicyEntry, LicenseTier, ScoreBands};

/// The policy used when the operator has not configured one.
pub fn default_policies(bands: &ScoreBands) -> Vec<LicensePolicyEntry> {
    use LicenseTier::*;

    let entry = |id: &str, tier: LicenseTier, aliases: &[&str]| {
        LicensePolicyEntry::new(id, tier, bands).with_aliases(aliases.iter().copied())
    };

    vec![
        entry("MIT", AlwaysAllowed, &["MIT/X11", "Expat", "X11"]),
        entry(
            "Apache-2.0",
            AlwaysAllowed,
            &["Apache 2.0", "Apache-2", "Apache License 2.0", "Apache License, Version 2.0", "ASL 2.0"],
        ),
        entry("BSD-2-Clause", AlwaysAllowed, &["Simplified BSD", "FreeBSD"]),
        entry("BSD-3-Clause", AlwaysAllowed, &["BSD", "New BSD", "Modified BSD"]),
        entry("ISC", AlwaysAllowed, &[]),
        entry("0BSD", AlwaysAllowed, &["Zero-Clause BSD"]),
        entry("Unlicense", AlwaysAllowed, &["The Unlicense"]),
        entry("CC0-1.0", AlwaysAllowed, &["CC0"]),
        entry("Zlib", Allowed, &[]).with_score(95),
        entry("Python-2.0", Allowed, &["PSF"]).with_score(90),
        entry("CC-BY-4.0", Allowed, &[]).with_score(85),
        entry("MPL-2.0", Allowed, &["Mozilla Public License 2.0"]),
        entry("LGPL-2.1", Allowed, &["LGPLv2.1"]),
        entry("LGPL-3.0", Allowed, &["LGPLv3"]),
        entry("EPL-2.0", Avoid, &["Eclipse Public License 2.0"]).with_score(60),
        entry("CDDL-1.0", Avoid, &[]).with_score(50),
        entry("GPL-2.0", Avoid, &["GPLv2"]).with_score(40),
        entry("CC-BY-SA-4.0", Avoid, &[]).with_score(40),
        entry("GPL-3.0", Blocked, &["GPLv3"]),
        entry("AGPL-3.0", Blocked, &["AGPLv3"]),
        entry("SSPL-1.0", Blocked, &[]),
        entry("BUSL-1.1", Blocked, &["Business Source License 1.1"]),
    ]
}
