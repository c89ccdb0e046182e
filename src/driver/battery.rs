//! The timed operation battery.
//!
//! Sixteen cases: {put, get, scatter, gather} x {blocking, non-blocking} x
//! {partitioned, full}. Every case performs an untimed warm-up pass (one
//! blocking call per data item), a barrier and a profiling-counter reset, a
//! timed loop over all items and iterations, a quiesce for the non-blocking
//! variants, and a final barrier. The two barriers run unconditionally even
//! when a case fails so the PEs stay aligned for the remaining cases.

use std::time::Instant;

use tracing::warn;

use crate::driver::{CaseResult, RunContext};
use crate::error::FamResult;

/// Elements per scatter/gather index list.
pub(crate) const PARTITION_COUNT: usize = 4;

enum Warmup {
    Put,
    Get,
}

pub(crate) fn run(ctx: &RunContext) -> Vec<CaseResult> {
    let data_size = ctx.cfg.data_size;
    let partition = data_size / PARTITION_COUNT;
    let full_sg_buffer = PARTITION_COUNT * data_size;

    vec![
        exec_case(ctx, "blocking_put_partial", Warmup::Put, |ctx| {
            put_case(ctx, partition, true)
        }),
        exec_case(ctx, "blocking_put_full", Warmup::Put, |ctx| {
            put_case(ctx, data_size, true)
        }),
        exec_case(ctx, "blocking_get_partial", Warmup::Get, |ctx| {
            get_case(ctx, partition, true)
        }),
        exec_case(ctx, "blocking_get_full", Warmup::Get, |ctx| {
            get_case(ctx, data_size, true)
        }),
        exec_case(ctx, "nonblocking_put_partial", Warmup::Put, |ctx| {
            put_case(ctx, partition, false)
        }),
        exec_case(ctx, "nonblocking_put_full", Warmup::Put, |ctx| {
            put_case(ctx, data_size, false)
        }),
        exec_case(ctx, "nonblocking_get_partial", Warmup::Get, |ctx| {
            get_case(ctx, partition, false)
        }),
        exec_case(ctx, "nonblocking_get_full", Warmup::Get, |ctx| {
            get_case(ctx, data_size, false)
        }),
        exec_case(ctx, "blocking_scatter_index", Warmup::Put, |ctx| {
            scatter_case(ctx, data_size, true)
        }),
        exec_case(ctx, "blocking_scatter_index_full", Warmup::Put, |ctx| {
            scatter_case(ctx, full_sg_buffer, true)
        }),
        exec_case(ctx, "blocking_gather_index", Warmup::Get, |ctx| {
            gather_case(ctx, data_size, true)
        }),
        exec_case(ctx, "blocking_gather_index_full", Warmup::Get, |ctx| {
            gather_case(ctx, full_sg_buffer, true)
        }),
        exec_case(ctx, "nonblocking_scatter_index", Warmup::Put, |ctx| {
            scatter_case(ctx, data_size, false)
        }),
        exec_case(ctx, "nonblocking_scatter_index_full", Warmup::Put, |ctx| {
            scatter_case(ctx, full_sg_buffer, false)
        }),
        exec_case(ctx, "nonblocking_gather_index", Warmup::Get, |ctx| {
            gather_case(ctx, data_size, false)
        }),
        exec_case(ctx, "nonblocking_gather_index_full", Warmup::Get, |ctx| {
            gather_case(ctx, full_sg_buffer, false)
        }),
    ]
}

fn exec_case<F>(ctx: &RunContext, name: &'static str, warm: Warmup, body: F) -> CaseResult
where
    F: Fn(&RunContext) -> FamResult<()>,
{
    let mut error = warmup(ctx, warm).err();
    ctx.client.barrier_all();
    ctx.client.reset_profile();
    let timer = Instant::now();
    if error.is_none() {
        error = body(ctx).err();
    }
    let duration = timer.elapsed();
    ctx.client.barrier_all();
    if let Some(err) = &error {
        warn!(case = name, %err, "battery case failed");
    }
    CaseResult {
        name,
        duration,
        error: error.map(|e| e.to_string()),
    }
}

fn warmup(ctx: &RunContext, warm: Warmup) -> FamResult<()> {
    let buf = ctx.client.alloc_local(ctx.cfg.data_size);
    for item in &ctx.items {
        match warm {
            Warmup::Put => ctx.client.put_blocking(&buf, item, 0, item.size())?,
            Warmup::Get => ctx.client.get_blocking(&buf, item, 0, item.size())?,
        }
    }
    Ok(())
}

fn put_case(ctx: &RunContext, len: usize, blocking: bool) -> FamResult<()> {
    let buf = ctx.client.alloc_local(len);
    for item in &ctx.items {
        for _ in 0..ctx.cfg.num_io_iters {
            if blocking {
                ctx.client.put_blocking(&buf, item, 0, len)?;
            } else {
                ctx.client.put_nonblocking(&buf, item, 0, len)?;
            }
        }
    }
    if !blocking {
        ctx.client.quiet()?;
    }
    Ok(())
}

fn get_case(ctx: &RunContext, len: usize, blocking: bool) -> FamResult<()> {
    let buf = ctx.client.alloc_local(len);
    for item in &ctx.items {
        for _ in 0..ctx.cfg.num_io_iters {
            if blocking {
                ctx.client.get_blocking(&buf, item, 0, len)?;
            } else {
                ctx.client.get_nonblocking(&buf, item, 0, len)?;
            }
        }
    }
    if !blocking {
        ctx.client.quiet()?;
    }
    Ok(())
}

fn scatter_case(ctx: &RunContext, buf_len: usize, blocking: bool) -> FamResult<()> {
    let buf = ctx.client.alloc_local(buf_len);
    let elem_size = ctx.cfg.data_size / PARTITION_COUNT;
    let indices: Vec<u64> = (0..PARTITION_COUNT as u64).collect();
    for item in &ctx.items {
        for _ in 0..ctx.cfg.num_io_iters {
            if blocking {
                ctx.client.scatter_blocking(&buf, item, &indices, elem_size)?;
            } else {
                ctx.client
                    .scatter_nonblocking(&buf, item, &indices, elem_size)?;
            }
        }
    }
    if !blocking {
        ctx.client.quiet()?;
    }
    Ok(())
}

fn gather_case(ctx: &RunContext, buf_len: usize, blocking: bool) -> FamResult<()> {
    let buf = ctx.client.alloc_local(buf_len);
    let elem_size = ctx.cfg.data_size / PARTITION_COUNT;
    let indices: Vec<u64> = (0..PARTITION_COUNT as u64).collect();
    for item in &ctx.items {
        for _ in 0..ctx.cfg.num_io_iters {
            if blocking {
                ctx.client.gather_blocking(&buf, item, &indices, elem_size)?;
            } else {
                ctx.client
                    .gather_nonblocking(&buf, item, &indices, elem_size)?;
            }
        }
    }
    if !blocking {
        ctx.client.quiet()?;
    }
    Ok(())
}
