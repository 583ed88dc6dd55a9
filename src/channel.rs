use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, fcntl};
use nix::libc::STDERR_FILENO;
use nix::unistd::{close, pipe};
use tracing::debug;

use crate::error::PipelineError;

/// One pipe between two adjacent stages.
#[derive(Debug)]
pub struct Channel {
    read: OwnedFd,
    write: OwnedFd,
}

impl Channel {
    pub fn read_end(&self) -> BorrowedFd<'_> {
        self.read.as_fd()
    }

    pub fn write_end(&self) -> BorrowedFd<'_> {
        self.write.as_fd()
    }
}

/// All channels of one pipeline, indexed by the position of the writing stage.
///
/// Channel `i` connects stage `i` to stage `i + 1`. Dropping the value closes
/// every descriptor in the current process, which is how the parent releases
/// its copies once all stages are running.
#[derive(Debug)]
pub struct Channels {
    channels: Vec<Channel>,
}

impl Channels {
    /// Create `count` pipes.
    ///
    /// Either every pipe is created or none is: pipes made before a failure are
    /// closed again when the partial list is dropped.
    pub fn allocate(count: usize) -> Result<Self, PipelineError> {
        let channels = (0..count)
            .map(|index| {
                let (read, write) = pipe()
                    .and_then(|(read, write)| Ok((above_stdio(read)?, above_stdio(write)?)))
                    .map_err(|errno| PipelineError::ResourceExhausted { index, errno })?;
                debug!(
                    index,
                    read = read.as_raw_fd(),
                    write = write.as_raw_fd(),
                    "allocated channel"
                );
                Ok(Channel { read, write })
            })
            .collect::<Result<Vec<_>, PipelineError>>()?;
        Ok(Self { channels })
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Channel> {
        self.channels.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    /// Close every channel descriptor inside a freshly forked child.
    ///
    /// Must run after the child has duplicated its own ends onto stdin and
    /// stdout and before it execs; otherwise a stray write end keeps a reader
    /// from ever seeing end-of-stream.
    pub fn close_all_in_child(&self) {
        for channel in &self.channels {
            let _ = close(channel.read.as_raw_fd());
            let _ = close(channel.write.as_raw_fd());
        }
    }
}

/// Move a pipe end that landed on a closed standard stream out of the way.
///
/// A child binds its ends onto 0 and 1, so a channel descriptor sitting there
/// would be overwritten by, or stand in for, another stage's stream.
fn above_stdio(fd: OwnedFd) -> Result<OwnedFd, Errno> {
    if fd.as_raw_fd() > STDERR_FILENO {
        return Ok(fd);
    }
    let lifted = fcntl(fd.as_raw_fd(), FcntlArg::F_DUPFD(STDERR_FILENO + 1))?;
    // SAFETY: `F_DUPFD` returned a fresh descriptor that nothing else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(lifted) })
}
