//! The mutex-guarded work queue and the fixed worker pool that drains it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;

use log::{error, trace};
use memmap2::Mmap;

use crate::error::IngestError;
use crate::ingest::{self, Ingest};

use super::blob::item::BlobItem;
use super::block::Worker;

pub(crate) fn run(ctx: &Ingest<'_>, map: &Mmap, items: Vec<BlobItem>) -> Result<(), IngestError> {
    let queue = Mutex::new(VecDeque::from(items));
    let cancel = AtomicBool::new(false);
    let failure: Mutex<Option<IngestError>> = Mutex::new(None);

    let workers = ctx.thread_count();
    if workers <= 1 {
        drain(0, ctx, map, &queue, &cancel, &failure);
    } else {
        thread::scope(|scope| {
            for slot in 0..workers {
                let queue = &queue;
                let cancel = &cancel;
                let failure = &failure;
                scope.spawn(move || drain(slot, ctx, map, queue, cancel, failure));
            }
        });
    }

    match failure.into_inner().unwrap() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn drain(
    slot: usize,
    ctx: &Ingest<'_>,
    map: &Mmap,
    queue: &Mutex<VecDeque<BlobItem>>,
    cancel: &AtomicBool,
    failure: &Mutex<Option<IngestError>>,
) {
    ingest::set_thread_index(slot);
    let mut worker = Worker::new(ctx);
    loop {
        // A failed peer stops everyone at the next pop.
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        let item = match queue.lock().unwrap().pop_front() {
            Some(item) => item,
            None => break,
        };
        ingest::set_block_index(item.index);
        trace!("worker {slot} decoding block {}", item.index);
        if let Err(err) = worker.process(&item, map) {
            error!("block {} failed: {err}", item.index);
            cancel.store(true, Ordering::Relaxed);
            let mut first = failure.lock().unwrap();
            if first.is_none() {
                *first = Some(err);
            }
            break;
        }
    }
}
