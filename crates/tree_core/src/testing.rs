use std::fmt::Debug;

use rand::RngCore;

use crate::error::Result;

/// Random source that returns the same word forever.
///
/// `ConstantRng(u64::MAX)` makes every uniform draw just below one, so every
/// survival check passes; `ConstantRng(0)` makes every draw zero.
pub(crate) struct ConstantRng(pub u64);

impl RngCore for ConstantRng {
    fn next_u32(&mut self) -> u32 {
        self.0 as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.0
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        for (byte, source) in dst.iter_mut().zip(self.0.to_le_bytes().iter().cycle()) {
            *byte = *source;
        }
    }
}

pub(crate) fn assert_err_contains<T: Debug>(result: Result<T>, needle: &str) {
    let err = result.expect_err("expected error");
    let message = format!("{err}");
    assert!(
        message.contains(needle),
        "expected error to contain \"{needle}\", got \"{message}\""
    );
}
