// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use stowage::item::{normalize_tags, split_tags};
use stowage::planner::sanitize_segment;

#[derive(Arbitrary, Debug)]
struct Input<'a> {
    tags: &'a str,
    segment: &'a str,
}

fuzz_target!(|input: Input<'_>| {
    let normalized = normalize_tags(input.tags);
    // Normalizing twice changes nothing
    assert_eq!(normalize_tags(&normalized), normalized);
    for tag in split_tags(&normalized) {
        assert!(!tag.is_empty());
        assert!(!tag.contains(','));
    }

    let segment = sanitize_segment(input.segment);
    assert!(!segment.is_empty());
    assert!(!segment.contains(['/', '\\', ':', '*', '?', '"', '<', '>', '|']));
    assert!(!segment.ends_with('.') && !segment.ends_with(' '));
});
