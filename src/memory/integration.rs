#[cfg(all(test, not(loom)))]
mod tests {
    use crate::memory::backend::{DefaultBackend, HeapBackend};
    use crate::memory::config::MemoryManagerConfig;
    use crate::memory::manager::MemoryManager;
    use crate::memory::space::MemorySpace;
    use crate::sync::barrier::Barrier;
    use crate::sync::{thread, Arc};

    #[test]
    fn test_integration_staging_roundtrip() {
        // X1: host -> device -> managed -> host through the default backend.
        let mm = MemoryManager::with_config(DefaultBackend::default(), MemoryManagerConfig::quiet());
        let n = 4096usize;

        let host = mm.allocate(n, MemorySpace::Host).unwrap();
        let device = mm.allocate(n, MemorySpace::Device).unwrap();
        let managed = mm.allocate(n, MemorySpace::Managed).unwrap();
        let back = mm.allocate(n, MemorySpace::Host).unwrap();

        // Safety: Test code; every range lies inside a live block.
        unsafe {
            for i in 0..n {
                *host.as_ptr().add(i) = (i % 251) as u8;
            }
            assert!(mm.copy(device.as_ptr(), host.as_ptr(), n, MemorySpace::Device, MemorySpace::Host, false));
            assert!(mm.copy(managed.as_ptr(), device.as_ptr(), n, MemorySpace::Managed, MemorySpace::Device, false));
            assert!(mm.copy(back.as_ptr(), managed.as_ptr(), n, MemorySpace::Host, MemorySpace::Managed, false));

            let out = std::slice::from_raw_parts(back.as_ptr(), n);
            assert!(out.iter().enumerate().all(|(i, &b)| b == (i % 251) as u8));
        }

        for (ptr, space) in [
            (host, MemorySpace::Host),
            (device, MemorySpace::Device),
            (managed, MemorySpace::Managed),
            (back, MemorySpace::Host),
        ] {
            assert!(mm.deallocate(ptr.as_ptr(), n, space));
        }
        assert!(mm.leak_report().is_clean());
        assert!(mm.is_consistent());
    }

    #[test]
    fn test_integration_thread_contention_mixed_spaces() {
        // X2: threads allocate, fill, copy and free across all spaces while
        // sharing one manager. Counters must balance exactly afterwards.
        let num_threads = 8usize;
        let iters = 100usize;
        let mm = Arc::new(MemoryManager::with_config(HeapBackend::new(), MemoryManagerConfig::quiet()));
        let barrier = Arc::new(Barrier::new(num_threads));

        let handles: Vec<_> = (0..num_threads)
            .map(|t| {
                let mm = mm.clone();
                let b = barrier.clone();
                thread::spawn(move || {
                    let space = MemorySpace::ALL[t % 3];
                    let other = MemorySpace::ALL[(t + 1) % 3];
                    b.wait();

                    for i in 0..iters {
                        let size = 16 << (i % 4);
                        let a = mm.allocate(size, space).unwrap();
                        let c = mm.allocate(size, other).unwrap();
                        // Safety: Test code; both blocks are live and owned
                        // by this thread.
                        unsafe {
                            a.as_ptr().write_bytes(t as u8, size);
                            assert!(mm.copy(c.as_ptr(), a.as_ptr(), size, other, space, false));
                            assert_eq!(*c.as_ptr().add(size - 1), t as u8);
                        }
                        assert!(mm.deallocate(a.as_ptr(), size, space));
                        assert!(mm.deallocate(c.as_ptr(), size, other));
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        let stats = mm.stats();
        let total_regs: u64 = MemorySpace::ALL.iter().map(|&s| mm.allocation_count(s)).sum();
        let total_deregs: u64 = MemorySpace::ALL.iter().map(|&s| mm.deallocation_count(s)).sum();
        assert_eq!(total_regs, (2 * num_threads * iters) as u64);
        assert_eq!(total_deregs, total_regs);
        assert_eq!(stats.total_live_bytes(), 0);
        assert_eq!(stats.rejected_copies, 0);
        assert!(mm.leak_report().is_clean());
    }

    #[test]
    fn test_integration_isolated_managers() {
        // X3: two managers never see each other's blocks.
        let a = MemoryManager::with_config(HeapBackend::new(), MemoryManagerConfig::quiet());
        let b = MemoryManager::with_config(HeapBackend::new(), MemoryManagerConfig::quiet());

        let p = a.allocate(128, MemorySpace::Device).unwrap();
        assert_eq!(b.space_of(p.as_ptr()), MemorySpace::Invalid);
        assert!(!b.deallocate(p.as_ptr(), 128, MemorySpace::Device));
        assert_eq!(a.live_count(MemorySpace::Device), 1);
        assert_eq!(b.stats().rejected_deallocations, 1);

        let q = b.allocate(128, MemorySpace::Device).unwrap();
        // Safety: Test code; validation rejects before anything is touched.
        unsafe {
            assert!(!a.copy(p.as_ptr(), q.as_ptr(), 128, MemorySpace::Device, MemorySpace::Device, false));
        }
        assert!(a.deallocate(p.as_ptr(), 128, MemorySpace::Device));
        assert!(b.deallocate(q.as_ptr(), 128, MemorySpace::Device));
    }
}
