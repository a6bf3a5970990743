//! The operator-facing console shared by every worker.
use crate::{cli, util};
use derivative::Derivative;
use indicatif::ProgressBar;
use std::{
    io::{self, Write},
    sync::{Mutex, PoisonError},
};

#[derive(Derivative)]
#[derivative(Debug)]
enum Target {
    Stream(#[derivative(Debug = "ignore")] Box<dyn Write + Send>),
    Progress(#[derivative(Debug = "ignore")] ProgressBar),
}

/// A line-atomic console writer. Every [`emit`](ConsoleSink::emit) holds the lock for the whole
/// line, so output from concurrent workers never interleaves below line granularity.
#[derive(Debug)]
pub struct ConsoleSink {
    target: Mutex<Target>,
}

impl ConsoleSink {
    pub fn stdout() -> Self {
        Self::to_writer(io::stdout())
    }

    pub fn to_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            target: Mutex::new(Target::Stream(Box::new(writer))),
        }
    }

    /// Prints lines above `pbar` and ticks it once per finished item. `pbar` must be visible,
    /// since hidden bars swallow printed lines.
    pub fn with_progress(pbar: ProgressBar) -> Self {
        pbar.set_style(cli::PROGRESS_BAR_STYLE.clone());
        Self {
            target: Mutex::new(Target::Progress(pbar)),
        }
    }

    pub fn emit<S: AsRef<str>>(&self, message: S) {
        let mut target = self.target.lock().unwrap_or_else(PoisonError::into_inner);
        match &mut *target {
            Target::Stream(writer) => {
                if let Err(e) = writeln!(writer, "{}", message.as_ref()).and_then(|_| writer.flush())
                {
                    log::warn!("Failed to write to console: {}", e);
                }
            }
            Target::Progress(pbar) => pbar.println(message.as_ref()),
        }
    }

    /// Records one finished item on the progress bar, if there is one.
    pub fn advance(&self, worker_id: usize, file_name: &str, failed: bool) {
        let target = self.target.lock().unwrap_or_else(PoisonError::into_inner);
        if let Target::Progress(pbar) = &*target {
            if failed {
                pbar.set_style(cli::ERROR_PROGRESS_BAR_STYLE.clone());
            }
            pbar.set_prefix(format!("worker {}", worker_id));
            pbar.set_message(util::safe_string_truncate(file_name, cli::MESSAGE_WIDTH));
            pbar.inc(1);
        }
    }

    pub fn set_length(&self, len: usize) {
        let target = self.target.lock().unwrap_or_else(PoisonError::into_inner);
        if let Target::Progress(pbar) = &*target {
            pbar.set_length(len as u64);
        }
    }

    pub fn finish(&self) {
        let target = self.target.lock().unwrap_or_else(PoisonError::into_inner);
        if let Target::Progress(pbar) = &*target {
            pbar.finish_and_clear();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[derive(Clone, Default)]
    pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        pub(crate) fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        // One byte at a time, so a writer that isn't serialized would tear lines.
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            match buf.first() {
                Some(byte) => {
                    self.0.lock().unwrap().push(*byte);
                    thread::yield_now();
                    Ok(1)
                }
                None => Ok(0),
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_emit_writes_whole_lines() {
        let buffer = SharedBuffer::default();
        let sink = ConsoleSink::to_writer(buffer.clone());
        sink.emit("first");
        sink.emit(String::from("second"));
        assert_eq!(buffer.contents(), "first\nsecond\n");
    }

    #[test]
    fn test_concurrent_emits_do_not_interleave() {
        let buffer = SharedBuffer::default();
        let sink = Arc::new(ConsoleSink::to_writer(buffer.clone()));
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let sink = Arc::clone(&sink);
                thread::spawn(move || {
                    for line in 0..25 {
                        sink.emit(format!("worker {} line {:02} payload", worker, line));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let contents = buffer.contents();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 100);
        for line in lines {
            let parts: Vec<&str> = line.split(' ').collect();
            assert_eq!(parts.len(), 5, "torn line: {:?}", line);
            assert_eq!(parts[0], "worker");
            assert_eq!(parts[2], "line");
            assert_eq!(parts[4], "payload");
        }
    }

    #[test]
    fn test_advance_without_progress_is_noop() {
        let buffer = SharedBuffer::default();
        let sink = ConsoleSink::to_writer(buffer.clone());
        sink.advance(0, "a.mp4", true);
        sink.finish();
        assert!(buffer.contents().is_empty());
    }
}
