//! Example objects, signal listeners and interrupt routing

mod common;

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use common::*;
use mythos_kernel::{
    boot::{slots, Kernel},
    invocation::{
        protocol::{example, interrupt_control, signal_listener},
        KernelInvocation,
    },
    objects::{
        example::ExampleHome,
        signal_listener::{Notification, SignalListener},
        Allocator, Signalable,
    },
    sync::Place,
    testing, Error,
};

const EXAMPLE: u32 = slots::FREE;
const LISTENER: u32 = slots::FREE + 1;

fn ping(inv: &Arc<KernelInvocation>, value: u64) -> example::Ping {
    inv.buf().write(&example::Ping { value, place: 0 });
    call(inv, EXAMPLE).unwrap();
    inv.buf().read::<example::Ping>().unwrap()
}

fn listener(kernel: &Kernel) -> Arc<SignalListener> {
    let dst = kernel.slot(LISTENER).unwrap();
    let mem_entry = kernel.slot(slots::UNTYPED_MEMORY).unwrap();
    let mem: Arc<dyn Allocator> = kernel.root_memory().clone();
    dst.acquire().unwrap();
    SignalListener::create(dst, mem_entry, mem_entry.cap(), &mem).unwrap()
}

mod example_tests {
    use super::*;

    #[test]
    fn test_ping_runs_on_home_place() {
        let kernel = kernel();
        let inv = kernel.invocation();
        create(&inv, slots::UNTYPED_MEMORY, slots::EXAMPLE_FACTORY, EXAMPLE, &NoArgs).unwrap();

        let reply = ping(&inv, 42);
        assert_eq!(reply.value, 42);
        assert_eq!(reply.place as usize, Place::current().id());
    }

    #[test]
    fn test_print_message_is_recorded() {
        let kernel = kernel();
        let inv = kernel.invocation();
        let dst = kernel.slot(EXAMPLE).unwrap();
        let mem_entry = kernel.slot(slots::UNTYPED_MEMORY).unwrap();
        let mem: Arc<dyn Allocator> = kernel.root_memory().clone();
        dst.acquire().unwrap();
        let obj = ExampleHome::create(dst, mem_entry, mem_entry.cap(), &mem).unwrap();
        assert_eq!(obj.home().id(), Place::current().id());

        example::write_print_message(&mut inv.buf(), b"hello from a test thread");
        call(&inv, EXAMPLE).unwrap();
        assert_eq!(obj.last_message().as_deref(), Some("hello from a test thread"));
    }

    #[test]
    fn test_move_home_to_another_place() {
        let kernel = kernel();
        let inv = kernel.invocation();
        create(&inv, slots::UNTYPED_MEMORY, slots::EXAMPLE_FACTORY, EXAMPLE, &NoArgs).unwrap();

        let helper_place = AtomicUsize::new(usize::MAX);
        let stop = AtomicBool::new(false);
        crossbeam_utils::thread::scope(|s| {
            s.spawn(|_| {
                let here = Place::current();
                helper_place.store(here.id(), Ordering::SeqCst);
                testing::run_until(|| stop.load(Ordering::SeqCst));
            });

            while helper_place.load(Ordering::SeqCst) == usize::MAX {
                std::thread::yield_now();
            }
            let target = helper_place.load(Ordering::SeqCst);
            assert_ne!(target, Place::current().id());

            inv.buf().write(&example::MoveHome { place: target as u64 });
            call(&inv, EXAMPLE).unwrap();
            let reply = ping(&inv, 7);
            assert_eq!(reply.value, 7);
            assert_eq!(reply.place as usize, target);

            stop.store(true, Ordering::SeqCst);
        })
        .unwrap();
    }

    #[test]
    fn test_move_home_to_unknown_place() {
        let kernel = kernel();
        let inv = kernel.invocation();
        create(&inv, slots::UNTYPED_MEMORY, slots::EXAMPLE_FACTORY, EXAMPLE, &NoArgs).unwrap();

        inv.buf().write(&example::MoveHome { place: u64::MAX });
        assert_eq!(call(&inv, EXAMPLE), Err(Error::InvalidArgument));
        assert_eq!(ping(&inv, 1).place as usize, Place::current().id());
    }

    #[test]
    fn test_concurrent_callers_are_served_at_home() {
        const THREADS: usize = 4;
        const CALLS: u64 = 50;

        let kernel = kernel();
        let inv = kernel.invocation();
        create(&inv, slots::UNTYPED_MEMORY, slots::EXAMPLE_FACTORY, EXAMPLE, &NoArgs).unwrap();
        let home = Place::current().id();
        let finished = AtomicUsize::new(0);

        crossbeam_utils::thread::scope(|s| {
            for thread in 0..THREADS as u64 {
                let (kernel, finished) = (&kernel, &finished);
                s.spawn(move |_| {
                    let inv = kernel.invocation();
                    for i in 0..CALLS {
                        let value = (thread << 32) | i;
                        let reply = ping(&inv, value);
                        assert_eq!(reply.value, value);
                        assert_eq!(reply.place as usize, home);
                    }
                    finished.fetch_add(1, Ordering::SeqCst);
                });
            }
            testing::run_until(|| finished.load(Ordering::SeqCst) == THREADS);
        })
        .unwrap();
    }

    #[test]
    fn test_delete_example_returns_memory() {
        let kernel = kernel();
        let inv = kernel.invocation();
        let free = kernel.root_memory().free_bytes();
        create(&inv, slots::UNTYPED_MEMORY, slots::EXAMPLE_FACTORY, EXAMPLE, &NoArgs).unwrap();
        assert!(kernel.root_memory().free_bytes() < free);

        delete(&inv, slots::CSPACE, EXAMPLE).unwrap();
        assert_eq!(kernel.root_memory().free_bytes(), free);
        assert!(kernel.slot(EXAMPLE).unwrap().cap().is_empty());
    }
}

mod interrupt_tests {
    use super::*;

    const IRQ: u32 = 33;
    const CONTEXT: u64 = 0xc0ff_ee00;

    fn bind(inv: &Arc<KernelInvocation>) {
        inv.buf().write(&signal_listener::Bind {
            context: CONTEXT,
            mask: u64::MAX,
            reset_mask: u64::MAX,
        });
        call(inv, LISTENER).unwrap();
    }

    fn register(inv: &Arc<KernelInvocation>) -> Result<(), Error> {
        inv.buf().write(&interrupt_control::Register {
            sink_ptr: LISTENER,
            sink_depth: 0,
            irq: IRQ,
        });
        call(inv, slots::INTERRUPT_CONTROL)
    }

    #[test]
    fn test_unbound_listener_only_accumulates() {
        let kernel = kernel();
        let listener = listener(&kernel);

        listener.signal(0b101);
        assert_eq!(listener.pending(), 0b101);
        assert_eq!(listener.take_notification(), None);

        listener.bind(9, 0b100, 0b100);
        assert_eq!(
            listener.take_notification(),
            Some(Notification { context: 9, bits: 0b100 })
        );
        assert_eq!(listener.pending(), 0b001);
        listener.reset(u64::MAX);
        assert_eq!(listener.pending(), 0);
    }

    #[test]
    fn test_interrupt_reaches_listener_once_until_unmasked() {
        let kernel = kernel();
        let inv = kernel.invocation();
        let listener = listener(&kernel);
        let irqs = kernel.interrupts();
        bind(&inv);

        assert!(irqs.is_masked(IRQ as usize));
        assert!(!irqs.handle_interrupt(IRQ as usize));
        register(&inv).unwrap();
        assert!(!irqs.is_masked(IRQ as usize));

        assert!(irqs.handle_interrupt(IRQ as usize));
        let expected = Notification {
            context: CONTEXT,
            bits: 1 << IRQ,
        };
        assert_eq!(listener.take_notification(), Some(expected));

        // The line masks itself until the handler is done.
        assert!(irqs.is_masked(IRQ as usize));
        assert!(!irqs.handle_interrupt(IRQ as usize));
        assert_eq!(listener.take_notification(), None);

        inv.buf().write(&interrupt_control::UnmaskIrq { irq: IRQ });
        call(&inv, slots::INTERRUPT_CONTROL).unwrap();
        assert!(irqs.handle_interrupt(IRQ as usize));
        assert_eq!(listener.take_notification(), Some(expected));
    }

    #[test]
    fn test_line_takes_one_handler() {
        let kernel = kernel();
        let inv = kernel.invocation();
        let _listener = listener(&kernel);

        register(&inv).unwrap();
        assert_eq!(register(&inv), Err(Error::RequestDenied));

        inv.buf().write(&interrupt_control::Unregister { irq: IRQ });
        call(&inv, slots::INTERRUPT_CONTROL).unwrap();
        register(&inv).unwrap();
    }

    #[test]
    fn test_register_needs_signalable_sink() {
        let kernel = kernel();
        let inv = kernel.invocation();

        inv.buf().write(&interrupt_control::Register {
            sink_ptr: slots::MEMORY_ROOT,
            sink_depth: 0,
            irq: IRQ,
        });
        assert_eq!(call(&inv, slots::INTERRUPT_CONTROL), Err(Error::TypeMismatch));

        let _listener = listener(&kernel);
        inv.buf().write(&interrupt_control::Register {
            sink_ptr: LISTENER,
            sink_depth: 0,
            irq: u32::MAX,
        });
        assert_eq!(call(&inv, slots::INTERRUPT_CONTROL), Err(Error::InvalidArgument));
    }

    #[test]
    fn test_deleting_listener_masks_line() {
        let kernel = kernel();
        let inv = kernel.invocation();
        let _listener = listener(&kernel);
        let irqs = kernel.interrupts();
        register(&inv).unwrap();
        assert!(!irqs.is_masked(IRQ as usize));

        delete(&inv, slots::CSPACE, LISTENER).unwrap();
        assert!(irqs.is_masked(IRQ as usize));
        assert!(!irqs.handle_interrupt(IRQ as usize));

        // The line is free for a new handler.
        let _listener = listener(&kernel);
        register(&inv).unwrap();
    }
}
