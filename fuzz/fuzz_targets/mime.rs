// as2-rs: AS2 message security engine
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

#![no_main]

use darkbio_as2::mime::{self, Headers, PartTree};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary input must never panic, only error out
    let Ok(tree) = mime::parse_entity(data) else {
        return;
    };
    // Whatever parsed must serialize and parse back into the same shape
    let (body, headers) = tree.serialize();
    let again = mime::parse(&body, &headers).expect("reparse of serialized tree");
    match (&tree, &again) {
        (PartTree::Opaque(a), PartTree::Opaque(b)) => assert_eq!(a.body(), b.body()),
        (PartTree::Signed { content: a, signature: x, .. }, PartTree::Signed { content: b, signature: y, .. }) => {
            assert_eq!(a.raw(), b.raw());
            assert_eq!(x, y);
        }
        (PartTree::Smime { kind: a, data: x }, PartTree::Smime { kind: b, data: y }) => {
            assert_eq!(a, b);
            assert_eq!(x, y);
        }
        _ => panic!("tree shape changed across serialization"),
    }
    let _ = Headers::parse(data);
});
