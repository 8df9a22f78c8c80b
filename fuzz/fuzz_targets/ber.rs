// as2-rs: AS2 message security engine
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

#![no_main]

use darkbio_as2::{ber, compress};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Normalized output must be stable DER
    if let Ok(der) = ber::normalize(data) {
        let again = ber::normalize(&der).expect("renormalize DER");
        assert_eq!(der, again);
    }
    let _ = compress::decompress(data);
});
