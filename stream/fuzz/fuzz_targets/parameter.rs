#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use spiped_stream::{
    keys::{sign_parameter, verify_parameter, Parameter, PARAMETER_KEY_LENGTH, PARAMETER_LENGTH},
    TAG_LENGTH,
};

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    key: [u8; PARAMETER_KEY_LENGTH],
    parameter: [u8; PARAMETER_LENGTH],
    require_pfs: bool,
}

fn fuzz(input: FuzzInput) {
    // Arbitrary bytes almost never carry a valid tag; they must never panic.
    let _ = verify_parameter(&input.parameter, &input.key, input.require_pfs);

    // A correctly signed value is accepted exactly when the value itself is valid.
    let mut value = [0u8; PARAMETER_LENGTH - TAG_LENGTH];
    let len = value.len();
    value.copy_from_slice(&input.parameter[..len]);
    let signed: Parameter = sign_parameter(&value, &input.key);
    if let Ok(public) = verify_parameter(&signed, &input.key, input.require_pfs) {
        assert_eq!(public.as_bytes(), &value);
        assert!(!(input.require_pfs && public.is_identity()));
    }
}

fuzz_target!(|input: FuzzInput| {
    fuzz(input);
});
