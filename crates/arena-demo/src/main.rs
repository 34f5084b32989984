use std::{process, ptr::NonNull};

use arena_pool::{ArenaAllocator, BlockState, WORD_SIZE};
use argh::FromArgs;
use log::info;
use snafu::{ResultExt as _, ensure_whatever};
use snafu_utils::{GenericError, Report};

/// Allocate and release blocks in a fixed arena and print its layout.
#[derive(Debug, FromArgs)]
struct Args {
    /// arena size in bytes
    #[argh(option, default = "512")]
    capacity: usize,
    /// payload bytes requested per allocation
    #[argh(option, default = "32")]
    size: usize,
    /// number of allocations
    #[argh(option, default = "2")]
    count: usize,
    /// request zero-filled blocks
    #[argh(switch)]
    zeroed: bool,
    /// release blocks in reverse allocation order
    #[argh(switch)]
    reverse: bool,
}

fn main() {
    pretty_env_logger::init();
    let args: Args = argh::from_env();

    if let Err(err) = run(&args) {
        let report = Report::new(err);
        eprintln!("{report}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), GenericError> {
    let mut buffer = vec![0_usize; args.capacity.div_ceil(WORD_SIZE)];
    let mut arena =
        unsafe { ArenaAllocator::from_raw_parts(buffer.as_mut_ptr().cast(), args.capacity) }
            .with_whatever_context(|_| {
                format!("failed to initialize arena, capacity={}", args.capacity)
            })?;
    info!(
        "arena ready: capacity={}, free_space={}",
        arena.capacity(),
        arena.free_space()
    );

    let mut blocks = allocate_blocks(&mut arena, args)?;
    println!("after allocation:");
    print_layout(&arena);

    if args.reverse {
        blocks.reverse();
    }
    for (index, ptr) in blocks.into_iter().enumerate() {
        unsafe { arena.release(ptr) }
            .with_whatever_context(|_| format!("failed to release block, index={index}"))?;
    }
    println!("after release:");
    print_layout(&arena);

    let stats = arena.stats();
    ensure_whatever!(
        stats.free_blocks == 1 && stats.free_space == arena.capacity(),
        "arena did not coalesce into one block, free_blocks={}, free_space={}",
        stats.free_blocks,
        stats.free_space
    );

    Ok(())
}

fn allocate_blocks(
    arena: &mut ArenaAllocator<'_>,
    args: &Args,
) -> Result<Vec<NonNull<u8>>, GenericError> {
    let mut blocks = Vec::with_capacity(args.count);
    for index in 0..args.count {
        let result = if args.zeroed {
            arena.allocate_zeroed(args.size)
        } else {
            arena.allocate(args.size)
        };
        let ptr = result.with_whatever_context(|_| {
            format!(
                "failed to allocate block, index={index}, size={}",
                args.size
            )
        })?;
        if !args.zeroed {
            unsafe { ptr.write_bytes(0xa5, args.size) };
        }
        blocks.push(ptr);
    }
    Ok(blocks)
}

fn print_layout(arena: &ArenaAllocator<'_>) {
    for block in arena.blocks() {
        let state = match block.state {
            BlockState::Free { .. } => "free",
            BlockState::Allocated => "used",
        };
        println!(
            "  {:>8}..{:<8} {state} {:>8} bytes",
            block.offset,
            block.end(),
            block.size
        );
    }
    let stats = arena.stats();
    println!(
        "  free_space={} free_blocks={} largest_free_block={} allocated_blocks={}",
        stats.free_space, stats.free_blocks, stats.largest_free_block, stats.allocated_blocks
    );
}
