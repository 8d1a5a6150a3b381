use handle32::bits::{InitError, InitFlags, RecordLayout};
use handle32::handle::{self, HandleConfig};

fn new_pool(max_handles: u32, userflag_bits: u32, flags: InitFlags) -> Vec<u8> {
    let config = HandleConfig {
        max_handles,
        userflag_bits,
        record_layout: RecordLayout::NoPayload,
        flags,
    };
    let mut buf = vec![0u8; handle::layout_size(&config)];
    unsafe { handle::init(buf.as_mut_ptr(), &config).unwrap() };
    buf
}

#[test]
fn basic_lifo_round_trip() {
    // Scenario 1: N=4, K=0, no payload, LIFO.
    let mut buf = new_pool(4, 0, InitFlags::LIFO);
    let base = buf.as_mut_ptr();
    unsafe {
        let (i0, h0) = handle::acquire(base).unwrap();
        let (i1, h1) = handle::acquire(base).unwrap();
        let (i2, h2) = handle::acquire(base).unwrap();
        assert_eq!((i0, i1, i2), (0, 1, 2));
        assert!(handle::valid(base, h0));
        assert!(handle::valid(base, h1));
        assert!(handle::valid(base, h2));

        assert_eq!(handle::release(base, h1), Some(1));

        let (i3, h3) = handle::acquire(base).unwrap();
        assert_eq!(i3, 1);
        assert!(!handle::valid(base, h1), "stale handle must no longer validate");
        assert!(handle::valid(base, h3));
        assert_ne!(h3, h1, "reacquired handle must carry a bumped generation");
    }
}

#[test]
fn fifo_wrap_reuses_in_release_order() {
    // Scenario 2: N=5, FIFO -> usable = 4.
    let mut buf = new_pool(5, 0, InitFlags::FIFO);
    let base = buf.as_mut_ptr();
    unsafe {
        assert_eq!(handle::capacity(base), 4);

        let first: Vec<(u32, u32)> = (0..4).map(|_| handle::acquire(base).unwrap()).collect();
        assert!(handle::acquire(base).is_none(), "5th acquire must report empty");

        for &(_, h) in &first {
            assert_eq!(handle::release(base, h).map(|_| ()), Some(()));
        }

        let second: Vec<(u32, u32)> = (0..4).map(|_| handle::acquire(base).unwrap()).collect();
        let first_indices: Vec<u32> = first.iter().map(|(i, _)| *i).collect();
        let second_indices: Vec<u32> = second.iter().map(|(i, _)| *i).collect();
        assert_eq!(first_indices, second_indices, "FIFO must dequeue in release order");
        for ((_, h1), (_, h2)) in first.iter().zip(second.iter()) {
            assert_ne!(h1, h2, "reused slots must carry bumped generations");
        }
    }
}

#[test]
fn generation_exhaustion_cycles_and_eventually_collides() {
    // Scenario 3: N=2 -> index_bits=1, generation_bits=30 by default, which
    // never realistically exhausts; force a narrow generation field via a
    // wide userflags width instead so the cycle length is small.
    let mut buf = new_pool(2, 28, InitFlags::LIFO);
    let base = buf.as_mut_ptr();
    unsafe {
        let (i, mut h) = handle::acquire(base).unwrap();
        let first = h;
        handle::release(base, h);

        // generation_bits == 2 here (32 - index_bits(1) - userflags(28) - in_use(1)).
        // Skipping 0 and the all-ones sentinel leaves 2 usable values, so the
        // cycle repeats after 2 reacquires.
        for _ in 0..2 {
            let (reacquired_index, reacquired_handle) = handle::acquire(base).unwrap();
            assert_eq!(reacquired_index, i);
            h = reacquired_handle;
            handle::release(base, h);
        }
        assert_eq!(h, first, "narrow generation field must eventually collide");
    }
}

#[test]
fn double_release_is_rejected() {
    let mut buf = new_pool(4, 0, InitFlags::LIFO);
    let base = buf.as_mut_ptr();
    unsafe {
        let (_, h) = handle::acquire(base).unwrap();
        assert!(handle::release(base, h).is_some());
        assert!(handle::release(base, h).is_none());
    }
}

#[test]
fn stale_and_foreign_handles_are_rejected() {
    let mut buf = new_pool(4, 0, InitFlags::LIFO);
    let base = buf.as_mut_ptr();
    unsafe {
        let (_, h) = handle::acquire(base).unwrap();
        handle::release(base, h).unwrap();
        assert!(!handle::valid(base, h));
        assert!(handle::release(base, h).is_none());
        assert!(handle::release(base, 0xFFFF_FFFF).is_none());
    }
}

#[test]
fn userflags_round_trip_and_can_be_overwritten() {
    let mut buf = new_pool(4, 3, InitFlags::LIFO);
    let base = buf.as_mut_ptr();
    unsafe {
        let (_, h) = handle::acquire_userflags(base, 0b101).unwrap();
        assert_eq!(handle::userflags(base, h), 0b101);

        let old = handle::userflags_set(base, h, 0b010);
        assert_eq!(old, 0b101);
        assert_eq!(handle::userflags(base, h), 0b010);
    }
}

#[test]
fn reset_invalidates_all_outstanding_handles() {
    let mut buf = new_pool(4, 0, InitFlags::LIFO);
    let base = buf.as_mut_ptr();
    unsafe {
        let (_, h0) = handle::acquire(base).unwrap();
        let (_, h1) = handle::acquire(base).unwrap();
        handle::reset(base);
        assert!(!handle::valid(base, h0));
        assert!(!handle::valid(base, h1));
        assert_eq!(handle::len(base), 0);
        assert!(handle::acquire(base).is_some());
    }
}

#[test]
fn threadsafe_fifo_combination_is_rejected_at_init() {
    let config = HandleConfig {
        max_handles: 4,
        userflag_bits: 0,
        record_layout: RecordLayout::NoPayload,
        flags: InitFlags::FIFO | InitFlags::THREADSAFE,
    };
    let mut buf = vec![0u8; handle::layout_size(&config)];
    let result = unsafe { handle::init(buf.as_mut_ptr(), &config) };
    assert_eq!(result, Err(InitError::THREADSAFE_UNSUPPORTED));
}

#[test]
fn oversized_config_is_rejected_at_init() {
    let config = HandleConfig {
        max_handles: 1 << 20,
        userflag_bits: 12,
        record_layout: RecordLayout::NoPayload,
        flags: InitFlags::LIFO,
    };
    let mut buf = vec![0u8; handle::layout_size(&config)];
    let result = unsafe { handle::init(buf.as_mut_ptr(), &config) };
    assert_eq!(result, Err(InitError::CONFIGURATION_UNSUPPORTED));
}

#[test]
fn non_inline_payload_round_trips() {
    let config = HandleConfig {
        max_handles: 4,
        userflag_bits: 0,
        record_layout: RecordLayout::NonInline {
            handle_area_size: 4,
            payload_size: 8,
        },
        flags: InitFlags::LIFO,
    };
    let mut buf = vec![0u8; handle::layout_size(&config)];
    let base = buf.as_mut_ptr();
    unsafe {
        handle::init(base, &config).unwrap();
        let (_, h) = handle::acquire(base).unwrap();
        let payload = handle::userdata(base, h).unwrap();
        payload.cast::<u64>().write_unaligned(0xDEAD_BEEF_CAFE_F00D);
        assert_eq!(payload.cast::<u64>().read_unaligned(), 0xDEAD_BEEF_CAFE_F00D);
    }
}

#[test]
fn inline_payload_loads_handle_from_caller_offset() {
    // The payload struct carries the handle at a caller-chosen byte offset
    // instead of in a dedicated handle slot ahead of the payload.
    #[repr(C)]
    #[derive(Clone, Copy)]
    struct Entity {
        x: f32,
        y: f32,
        handle: u32,
    }

    let config = HandleConfig {
        max_handles: 4,
        userflag_bits: 0,
        record_layout: RecordLayout::Inline {
            handle_offset: 8,
            record_size: core::mem::size_of::<Entity>() as u32,
        },
        flags: InitFlags::LIFO,
    };
    let mut buf = vec![0u8; handle::layout_size(&config)];
    let base = buf.as_mut_ptr();
    unsafe {
        handle::init(base, &config).unwrap();
        let (_, h) = handle::acquire(base).unwrap();
        let entity_ptr = handle::userdata(base, h).unwrap().cast::<Entity>();
        entity_ptr.write(Entity { x: 1.0, y: 2.0, handle: h });
        let entity = entity_ptr.read();
        assert_eq!(entity.handle, h);
        assert_eq!((entity.x, entity.y), (1.0, 2.0));
    }
}

#[test]
fn alt_layout_puts_in_use_bit_below_userflags_and_generation() {
    let mut buf = new_pool(4, 3, InitFlags::LIFO | InitFlags::DONT_USE_MSB_AS_IN_USE_BIT);
    let base = buf.as_mut_ptr();
    unsafe {
        let (i, h) = handle::acquire_userflags(base, 0b110).unwrap();
        assert!(handle::valid(base, h));
        assert_eq!(handle::index(base, h), i);
        assert_eq!(handle::userflags(base, h), 0b110);

        assert_eq!(handle::release(base, h), Some(i));
        let (i2, h2) = handle::acquire(base).unwrap();
        assert_eq!(i2, i);
        assert_ne!(h2, h, "reacquired handle under alt layout must bump generation");
    }
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "corrupted handle allocator header")]
fn corrupted_header_is_caught_in_debug_builds() {
    let mut buf = new_pool(4, 0, InitFlags::LIFO);
    let base = buf.as_mut_ptr();
    unsafe {
        base.cast::<u32>().write(0xBAD_0BAD);
        handle::acquire(base);
    }
}
