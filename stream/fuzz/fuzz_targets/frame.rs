#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use spiped_stream::{
    packet::{KeySet, KEY_MATERIAL_LENGTH},
    FRAME_SIZE, MAX_DATA_SIZE,
};

#[derive(Arbitrary, Debug)]
enum Step {
    Send(Vec<u8>),
    Forge(Vec<u8>),
    Flip { offset: u16, bit: u8 },
}

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    material: [u8; KEY_MATERIAL_LENGTH],
    steps: Vec<Step>,
}

fn fuzz(input: FuzzInput) {
    let mut sender = KeySet::new(&input.material);
    let mut receiver = KeySet::new(&input.material);

    for step in input.steps {
        match step {
            Step::Send(mut data) => {
                data.truncate(MAX_DATA_SIZE);
                let mut frame = sender.encrypt(&data).unwrap();
                assert_eq!(receiver.decrypt(&mut frame).unwrap(), &data[..]);
            }
            Step::Forge(bytes) => {
                let mut frame = [0u8; FRAME_SIZE];
                let n = bytes.len().min(FRAME_SIZE);
                frame[..n].copy_from_slice(&bytes[..n]);
                let before = receiver.counter();
                assert!(receiver.decrypt(&mut frame).is_err());
                assert_eq!(receiver.counter(), before);
            }
            Step::Flip { offset, bit } => {
                let original = sender.encrypt(b"flip").unwrap();
                let index = offset as usize % FRAME_SIZE;
                let mask = 1 << (bit % 8);
                let mut tampered = original;
                tampered[index] ^= mask;
                let before = receiver.counter();
                assert!(receiver.decrypt(&mut tampered).is_err());
                assert_eq!(receiver.counter(), before);

                // The rejected frame left the receiver in step with the untampered one.
                let mut frame = original;
                assert_eq!(receiver.decrypt(&mut frame).unwrap(), b"flip");
            }
        }
    }
}

fuzz_target!(|input: FuzzInput| {
    fuzz(input);
});
