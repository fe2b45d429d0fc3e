#![no_main]
use libfuzzer_sys::fuzz_target;
use notetex_macros::{Definitions, expand_environments};

fuzz_target!(|data: &[u8]| {
    // The same bytes serve as definitions source and as math content.
    let s = String::from_utf8_lossy(data);
    let extraction = Definitions::extract(&s);
    let _ = expand_environments(&s, &extraction.definitions.environments);
});
