//! A small typed message channel over a `socketpair`, used by the test
//! harness to ferry results out of forked child processes. This is
//! unrelated to [`crate`]'s namespace-barrier IPC (see `IpcAgent` in
//! `libcontainer`), which is a UDS-plus-pipe rendezvous with different
//! ordering guarantees; this channel is a plain bidirectional pipe for
//! passing one serializable value.

use std::io::{IoSlice, IoSliceMut};
use std::marker::PhantomData;
use std::os::fd::{AsRawFd, RawFd};

use nix::sys::socket::{self, UnixAddr};
use nix::unistd;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("failed unix syscalls")]
    Nix(#[from] nix::Error),
    #[error("failed serde serialization")]
    Serde(#[from] serde_json::Error),
    #[error("channel connection broken")]
    BrokenChannel,
}

#[derive(Clone)]
pub struct Receiver<T> {
    receiver: RawFd,
    phantom: PhantomData<T>,
}

#[derive(Clone)]
pub struct Sender<T> {
    sender: RawFd,
    phantom: PhantomData<T>,
}

impl<T> Sender<T>
where
    T: Serialize,
{
    fn send_slice_with_len(&mut self, data: &[u8]) -> Result<usize, ChannelError> {
        let len = data.len() as u64;
        let iov = [
            IoSlice::new(unsafe {
                std::slice::from_raw_parts(
                    (&len as *const u64) as *const u8,
                    std::mem::size_of::<u64>(),
                )
            }),
            IoSlice::new(data),
        ];
        socket::sendmsg::<UnixAddr>(self.sender, &iov, &[], socket::MsgFlags::empty(), None)
            .map_err(|e| e.into())
    }

    pub fn send(&mut self, object: T) -> Result<(), ChannelError> {
        let payload = serde_json::to_vec(&object)?;
        self.send_slice_with_len(&payload)?;
        Ok(())
    }

    pub fn close(&self) -> Result<(), ChannelError> {
        Ok(unistd::close(self.sender)?)
    }
}

impl<T> Receiver<T>
where
    T: serde::de::DeserializeOwned,
{
    fn peek_size(&mut self) -> Result<u64, ChannelError> {
        let mut len: u64 = 0;
        let mut iov = [IoSliceMut::new(unsafe {
            std::slice::from_raw_parts_mut(
                (&mut len as *mut u64) as *mut u8,
                std::mem::size_of::<u64>(),
            )
        })];
        let _ = socket::recvmsg::<UnixAddr>(
            self.receiver,
            &mut iov,
            None,
            socket::MsgFlags::MSG_PEEK,
        )?;
        match len {
            0 => Err(ChannelError::BrokenChannel),
            _ => Ok(len),
        }
    }

    pub fn recv(&mut self) -> Result<T, ChannelError> {
        let msg_len = self.peek_size()?;
        let mut len: u64 = 0;
        let mut buf = vec![0u8; msg_len as usize];
        let bytes = {
            let mut iov = [
                IoSliceMut::new(unsafe {
                    std::slice::from_raw_parts_mut(
                        (&mut len as *mut u64) as *mut u8,
                        std::mem::size_of::<u64>(),
                    )
                }),
                IoSliceMut::new(&mut buf),
            ];
            socket::recvmsg::<UnixAddr>(self.receiver, &mut iov, None, socket::MsgFlags::empty())?
                .bytes
        };
        if bytes == 0 {
            return Err(ChannelError::BrokenChannel);
        }
        Ok(serde_json::from_slice(&buf[..])?)
    }

    pub fn close(&self) -> Result<(), ChannelError> {
        Ok(unistd::close(self.receiver)?)
    }
}

pub fn channel<T>() -> Result<(Sender<T>, Receiver<T>), ChannelError>
where
    T: for<'de> Deserialize<'de> + Serialize,
{
    let (f1, f2) = socket::socketpair(
        socket::AddressFamily::Unix,
        socket::SockType::SeqPacket,
        None,
        socket::SockFlag::SOCK_CLOEXEC,
    )?;
    let f1 = std::mem::ManuallyDrop::new(f1);
    let f2 = std::mem::ManuallyDrop::new(f2);
    Ok((
        Sender {
            sender: f1.as_raw_fd(),
            phantom: PhantomData,
        },
        Receiver {
            receiver: f2.as_raw_fd(),
            phantom: PhantomData,
        },
    ))
}
