use handle32::bits::InitFlags;
use handle32::dense::{self, DenseConfig};

fn new_pool(max_handles: u32, payload_size: u32) -> Vec<u8> {
    let config = DenseConfig {
        max_handles,
        userflag_bits: 0,
        payload_size,
        flags: InitFlags::LIFO,
    };
    let mut buf = vec![0u8; dense::layout_size(&config)];
    unsafe { dense::init(buf.as_mut_ptr(), &config).unwrap() };
    buf
}

#[test]
fn dense_swap_to_back_on_middle_release() {
    // Scenario 4.
    let mut buf = new_pool(4, 0);
    let base = buf.as_mut_ptr();
    unsafe {
        let ha = dense::acquire(base).unwrap();
        let hb = dense::acquire(base).unwrap();
        let hc = dense::acquire(base).unwrap();
        let hd = dense::acquire(base).unwrap();
        assert_eq!(
            (ha.dense_index, hb.dense_index, hc.dense_index, hd.dense_index),
            (0, 1, 2, 3)
        );

        let released = dense::release(base, hb.handle).unwrap();
        assert_eq!(released.move_from, 3);
        assert_eq!(released.move_to, 1);
        assert!(!released.is_back_index);

        assert_eq!(dense::dense_index(base, hd.handle), Some(1));
        assert_eq!(dense::dense_index(base, hc.handle), Some(2));
        assert_eq!(dense::dense_index(base, ha.handle), Some(0));
        assert_eq!(dense::dense_index(base, hb.handle), None);
    }
}

#[test]
fn live_set_stays_packed_after_many_releases() {
    let mut buf = new_pool(8, 0);
    let base = buf.as_mut_ptr();
    unsafe {
        let handles: Vec<_> = (0..8).map(|_| dense::acquire(base).unwrap()).collect();
        for h in handles.iter().step_by(2) {
            dense::release(base, h.handle).unwrap();
        }
        assert_eq!(dense::len(base), 4);
        for h in handles.iter().skip(1).step_by(2) {
            let d = dense::dense_index(base, h.handle).unwrap();
            assert!(d < 4, "surviving handle must occupy a dense slot < size");
        }
    }
}

#[test]
fn payload_survives_across_unrelated_releases() {
    let mut buf = new_pool(4, 4);
    let base = buf.as_mut_ptr();
    unsafe {
        let a = dense::acquire(base).unwrap();
        dense::payload(base, a.handle).unwrap().cast::<u32>().write(42);
        let b = dense::acquire(base).unwrap();
        dense::release(base, b.handle).unwrap();
        assert_eq!(dense::payload(base, a.handle).unwrap().cast::<u32>().read(), 42);
    }
}
