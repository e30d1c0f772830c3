//! Mock construction helpers

use mockall::mock;
use vidpipe_rs::pipeline::modules::CaptureDevice;
use vidpipe_rs::PipelineResult;

mock! {
    pub Capture {}

    impl CaptureDevice for Capture {
        fn open(&mut self, width: u32, height: u32) -> PipelineResult<()>;
        fn capture(&mut self) -> PipelineResult<Option<Vec<u8>>>;
        fn close(&mut self);
    }
}

/// A capture device that yields `frames` small images, then reports exhaustion.
pub fn finite_capture(frames: usize) -> MockCapture {
    let mut device = MockCapture::new();
    device.expect_open().returning(|_, _| Ok(()));
    let mut remaining = frames;
    device.expect_capture().returning(move || {
        if remaining == 0 {
            return Ok(None);
        }
        remaining -= 1;
        Ok(Some(vec![0u8; 16]))
    });
    device.expect_close().returning(|| ());
    device
}
