use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::common::{PageId, Result, StrataError, PAGE_SIZE};

use super::DiskManager;

type PageBuf = Box<[u8; PAGE_SIZE]>;

/// A disk I/O request. The buffer travels with the request and is handed
/// back through the completion channel, so no borrowed data crosses the
/// worker thread boundary.
enum DiskRequest {
    Read {
        page_id: PageId,
        buf: PageBuf,
        done: std::sync::mpsc::Sender<(PageBuf, bool)>,
    },
    Write {
        page_id: PageId,
        buf: PageBuf,
        done: std::sync::mpsc::Sender<(PageBuf, bool)>,
    },
}

/// DiskScheduler owns a background worker thread that drains a bounded
/// queue of disk requests. The buffer pool only uses the synchronous
/// wrappers, which block on the request's completion channel.
pub struct DiskScheduler {
    disk_manager: Arc<DiskManager>,
    request_sender: Sender<DiskRequest>,
    shutdown: Arc<AtomicBool>,
    worker_handle: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (sender, receiver) = bounded::<DiskRequest>(128);
        let shutdown = Arc::new(AtomicBool::new(false));

        let dm = Arc::clone(&disk_manager);
        let shutdown_flag = Arc::clone(&shutdown);
        let worker_handle = thread::spawn(move || {
            Self::worker_loop(dm, receiver, shutdown_flag);
        });

        Self {
            disk_manager,
            request_sender: sender,
            shutdown,
            worker_handle: Some(worker_handle),
        }
    }

    /// Reads a page and waits for completion.
    pub fn read_sync(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (tx, rx) = std::sync::mpsc::channel();
        self.submit(DiskRequest::Read {
            page_id,
            buf: Box::new([0u8; PAGE_SIZE]),
            done: tx,
        })?;

        let (buf, ok) = rx
            .recv()
            .map_err(|e| StrataError::DiskScheduler(format!("read completion lost: {}", e)))?;
        if !ok {
            return Err(StrataError::DiskScheduler(format!(
                "read of {} failed",
                page_id
            )));
        }
        data.copy_from_slice(&buf[..]);
        Ok(())
    }

    /// Writes a page and waits for completion.
    pub fn write_sync(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let mut buf: PageBuf = Box::new([0u8; PAGE_SIZE]);
        buf.copy_from_slice(data);

        let (tx, rx) = std::sync::mpsc::channel();
        self.submit(DiskRequest::Write {
            page_id,
            buf,
            done: tx,
        })?;

        let (_, ok) = rx
            .recv()
            .map_err(|e| StrataError::DiskScheduler(format!("write completion lost: {}", e)))?;
        if !ok {
            return Err(StrataError::DiskScheduler(format!(
                "write of {} failed",
                page_id
            )));
        }
        Ok(())
    }

    fn submit(&self, request: DiskRequest) -> Result<()> {
        self.request_sender
            .send(request)
            .map_err(|e| StrataError::DiskScheduler(format!("failed to schedule request: {}", e)))
    }

    fn worker_loop(
        disk_manager: Arc<DiskManager>,
        receiver: Receiver<DiskRequest>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                // Drain what is already queued before exiting.
                while let Ok(request) = receiver.try_recv() {
                    Self::process(&disk_manager, request);
                }
                break;
            }

            match receiver.recv_timeout(std::time::Duration::from_millis(100)) {
                Ok(request) => Self::process(&disk_manager, request),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn process(disk_manager: &DiskManager, request: DiskRequest) {
        match request {
            DiskRequest::Read {
                page_id,
                mut buf,
                done,
            } => {
                let ok = disk_manager.read_page(page_id, &mut buf[..]).is_ok();
                let _ = done.send((buf, ok));
            }
            DiskRequest::Write { page_id, buf, done } => {
                let ok = disk_manager.write_page(page_id, &buf[..]).is_ok();
                let _ = done.send((buf, ok));
            }
        }
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}
