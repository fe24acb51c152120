use super::*;
use crate::config::ProfileMode;
use crate::errors::ExecError;
use crate::layout::LayoutHelper;
use crate::meta::TypeHandle;
use crate::runtime::{InstanceClass, KlassRef, Outcome, SimulatedVm};
use crate::snippet::Inst;

const METHOD: &str = "Demo.run";
const GARBAGE: u64 = 0xABAB_ABAB_ABAB_ABAB;

fn config() -> LoweringConfig {
    LoweringConfig {
        assertions: true,
        ..LoweringConfig::default()
    }
}

fn vm(config: &LoweringConfig) -> SimulatedVm {
    let mut vm = SimulatedVm::new(config.clone()).unwrap();
    vm.define_primitive_arrays().unwrap();
    vm
}

fn lower(vm: &SimulatedVm, request: AllocationRequest) -> Snippet {
    Lowerer::new(vm.config().clone())
        .lower(&request, &vm.tool(METHOD))
        .unwrap()
}

fn instance(vm: &mut SimulatedVm, name: &str, size: u32) -> KlassRef {
    vm.define_instance(&InstanceClass::new(name, size)).unwrap()
}

fn int_array(vm: &SimulatedVm) -> TypeHandle {
    TypeHandle(vm.klasses().array_class_of(ElementKind::Int).unwrap().klass)
}

#[test]
fn test_fixed_instance_fast_path() {
    let config = config();
    let mut vm = vm(&config);
    let point = instance(&mut vm, "Point", 32);
    vm.install_tlab(1000, 2000).unwrap();
    vm.memory_mut().fill(1000, 1000, 0xAB).unwrap();

    let snippet = lower(&vm, AllocationRequest::NewInstance(NewInstance::new(point.handle)));
    let outcome = vm.run(&snippet, &[]).unwrap();

    assert_eq!(outcome, Outcome::Object(1000));
    assert_eq!(vm.tlab().unwrap(), ThreadAllocationBuffer::new(1032, 2000));
    assert_eq!(vm.memory().read_word(1000).unwrap(), config.klass.unlocked_mark);
    assert_eq!(vm.memory().read_word(1008).unwrap(), point.klass);
    assert_eq!(vm.memory().read_word(1016).unwrap(), 0);
    assert_eq!(vm.memory().read_word(1024).unwrap(), 0);
    // nothing past the object is touched
    assert_eq!(vm.memory().read_word(1032).unwrap(), GARBAGE);
    assert!(vm.fallback_calls().is_empty());
    assert!(!snippet.contains_loop());
}

#[test]
fn test_fixed_array_falls_back_when_exhausted() {
    let config = config();
    let mut vm = vm(&config);
    let ints = int_array(&vm);
    vm.install_tlab(2000, 2030).unwrap();

    let snippet = lower(&vm, AllocationRequest::NewArray(NewArray::new(ints, Input::Const(5))));
    let outcome = vm.run(&snippet, &[]).unwrap();

    let calls = vm.fallback_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].descriptor, FallbackDescriptor::NewArray);
    assert_eq!(calls[0].args.as_slice(), &[ints.0 as i64, 5, 1]);
    assert_eq!(vm.tlab().unwrap(), ThreadAllocationBuffer::new(2000, 2030));
    let object = outcome.object().unwrap();
    assert_eq!(vm.memory().region_of(object), Some("eden"));
}

#[test]
fn test_fixed_array_fast_path_formats_header() {
    let config = config();
    let mut vm = vm(&config);
    let ints = int_array(&vm);
    vm.install_tlab(0x1000, 0x2000).unwrap();
    vm.memory_mut().fill(0x1000, 0x1000, 0xAB).unwrap();

    let snippet = lower(&vm, AllocationRequest::NewArray(NewArray::new(ints, Input::param("length"))));
    let outcome = vm.run(&snippet, &[("length", 5)]).unwrap();

    assert_eq!(outcome, Outcome::Object(0x1000));
    // 20 header bytes + 5 ints, rounded to 40
    assert_eq!(vm.tlab().unwrap().top, 0x1028);
    assert_eq!(vm.memory().read(0x1010, Width::W32).unwrap(), 5);
    assert_eq!(vm.memory().read_word(0x1008).unwrap(), ints.0);
    for offset in (20..40).step_by(4) {
        assert_eq!(vm.memory().read(0x1000 + offset, Width::W32).unwrap(), 0, "offset {}", offset);
    }
    assert_eq!(vm.memory().read_word(0x1028).unwrap(), GARBAGE);

    let length = vm.stores().iter().position(|s| s.location == Location::ArrayLength).unwrap();
    let hub = vm.stores().iter().position(|s| s.location == Location::HubWrite).unwrap();
    let first_init = vm.stores().iter().position(|s| s.location == Location::Init).unwrap();
    assert!(length < hub);
    assert!(hub < first_init);
}

#[test]
fn test_negative_fixed_length_takes_fallback() {
    let config = config();
    let mut vm = vm(&config);
    let ints = int_array(&vm);
    vm.install_tlab(0x1000, 0x2000).unwrap();

    let snippet = lower(&vm, AllocationRequest::NewArray(NewArray::new(ints, Input::param("length"))));
    let err = vm.run(&snippet, &[("length", -1)]).unwrap_err();

    // the runtime rejects the length; the fast path never ran
    assert!(matches!(err, ExecError::Exception(_)));
    assert_eq!(vm.tlab().unwrap().top, 0x1000);
    assert_eq!(vm.fallback_calls()[0].args.as_slice(), &[ints.0 as i64, -1, 1]);
}

#[test]
fn test_huge_length_takes_fallback() {
    let config = config();
    let mut vm = vm(&config);
    let ints = int_array(&vm);
    vm.install_tlab(0x1000, 0x2000).unwrap();

    let snippet = lower(&vm, AllocationRequest::NewArray(NewArray::new(ints, Input::param("length"))));
    let _ = vm.run(&snippet, &[("length", MAX_ARRAY_FAST_PATH_LENGTH)]);

    assert_eq!(vm.fallback_calls().len(), 1);
    assert_eq!(vm.tlab().unwrap().top, 0x1000);
}

#[test]
fn test_unresolved_handle_only_calls_runtime() {
    let config = config();
    let vm = vm(&config);
    let handle = TypeHandle(0xDEAD_0000);

    let snippet = lower(&vm, AllocationRequest::NewInstance(NewInstance::new(handle)));
    assert_eq!(snippet.calls(), vec![FallbackDescriptor::NewInstance]);
    assert!(snippet.first_store_to(Location::TlabTop).is_none());

    let snippet = lower(&vm, AllocationRequest::NewArray(NewArray::new(handle, Input::Const(3))));
    assert_eq!(snippet.calls(), vec![FallbackDescriptor::NewArray]);
    assert!(snippet.first_store_to(Location::TlabTop).is_none());
}

#[test]
fn test_shape_mismatch_rejected() {
    let config = config();
    let mut vm = vm(&config);
    let point = instance(&mut vm, "Point", 16);
    let ints = int_array(&vm);
    let lowerer = Lowerer::new(config);

    let err = lowerer
        .lower_new_instance(&NewInstance::new(ints), &vm.tool(METHOD))
        .unwrap_err();
    assert!(matches!(err, LoweringError::NotAnInstance { .. }));

    let err = lowerer
        .lower_new_array(&NewArray::new(point.handle, Input::Const(1)), &vm.tool(METHOD))
        .unwrap_err();
    assert_eq!(err, LoweringError::NotAnArray { name: "Point".to_string() });
}

#[test]
fn test_slow_path_instance_calls_stub() {
    let config = LoweringConfig {
        snippet_counters: true,
        ..config()
    };
    let mut vm = vm(&config);
    let mut class = InstanceClass::new("Finalizable", 32);
    class.slow_path = true;
    let klass = vm.define_instance(&class).unwrap();
    vm.install_tlab(0x1000, 0x2000).unwrap();

    let snippet = lower(&vm, AllocationRequest::NewInstance(NewInstance::new(klass.handle)));
    vm.run(&snippet, &[]).unwrap();

    assert_eq!(vm.fallback_calls()[0].args.as_slice(), &[klass.klass as i64]);
    assert_eq!(vm.counters().get("NewInstance", "stub"), 1);
    assert_eq!(vm.tlab().unwrap().top, 0x1000);
}

#[test]
fn test_dynamic_instance_fast_path() {
    let config = config();
    let mut vm = vm(&config);
    let point = instance(&mut vm, "Point", 24);
    vm.install_tlab(0x1000, 0x2000).unwrap();

    let snippet = lower(
        &vm,
        AllocationRequest::DynamicNewInstance(DynamicNewInstance::new(Input::param("class"))),
    );
    let outcome = vm.run(&snippet, &[("class", point.mirror as i64)]).unwrap();

    assert_eq!(outcome, Outcome::Object(0x1000));
    assert_eq!(vm.tlab().unwrap().top, 0x1018);
    assert_eq!(vm.memory().read_word(0x1008).unwrap(), point.klass);
    assert!(vm.fallback_calls().is_empty());
}

#[test]
fn test_dynamic_instance_with_slow_path_bit_calls_runtime() {
    let config = config();
    let mut vm = vm(&config);
    let mut class = InstanceClass::new("Slow", 32);
    class.slow_path = true;
    let slow = vm.define_instance(&class).unwrap();
    vm.install_tlab(0x1000, 0x2000).unwrap();

    let snippet = lower(
        &vm,
        AllocationRequest::DynamicNewInstance(DynamicNewInstance::new(Input::param("class"))),
    );
    let outcome = vm.run(&snippet, &[("class", slow.mirror as i64)]).unwrap();

    let calls = vm.fallback_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].descriptor, FallbackDescriptor::DynamicNewInstance);
    assert_eq!(calls[0].args.as_slice(), &[slow.mirror as i64]);
    assert_eq!(vm.tlab().unwrap().top, 0x1000);
    assert_eq!(vm.memory().region_of(outcome.object().unwrap()), Some("eden"));
}

#[test]
fn test_dynamic_instance_uninitialized_calls_runtime() {
    let config = config();
    let mut vm = vm(&config);
    let mut class = InstanceClass::new("Lazy", 16);
    class.initialized = false;
    let lazy = vm.define_instance(&class).unwrap();
    vm.install_tlab(0x1000, 0x2000).unwrap();

    let snippet = lower(
        &vm,
        AllocationRequest::DynamicNewInstance(DynamicNewInstance::new(Input::param("class"))),
    );
    vm.run(&snippet, &[("class", lazy.mirror as i64)]).unwrap();

    assert_eq!(vm.fallback_calls().len(), 1);
    assert_eq!(vm.tlab().unwrap().top, 0x1000);
}

#[test]
fn test_dynamic_instance_neutral_layout_word_skips_fast_path() {
    let config = config();
    let mut vm = vm(&config);
    let class = instance(&mut vm, "Neutral", 16);
    vm.memory_mut()
        .write(
            class.klass + config.klass.layout_helper_offset as u64,
            Width::W32,
            i64::from(LayoutHelper::NEUTRAL.raw()),
        )
        .unwrap();
    let snippet = lower(
        &vm,
        AllocationRequest::DynamicNewInstance(DynamicNewInstance::new(Input::param("class"))),
    );

    for (top, end) in [(0x1000, 0x1000), (0x1000, 0x2000)] {
        vm.install_tlab(top, end).unwrap();
        let calls_before = vm.fallback_calls().len();
        let result = vm.run(&snippet, &[("class", class.mirror as i64)]);

        // the runtime refuses to instantiate a neutral layout word
        assert!(matches!(result, Err(ExecError::Exception(_))), "{result:?}");
        let calls = vm.fallback_calls();
        assert_eq!(calls.len(), calls_before + 1);
        assert_eq!(calls[calls_before].descriptor, FallbackDescriptor::DynamicNewInstance);
        assert!(vm.stores().is_empty());
        assert_eq!(vm.tlab().unwrap(), ThreadAllocationBuffer::new(top, end));
    }
}

#[test]
fn test_dynamic_instance_deoptimizes_on_uninstantiable() {
    let config = config();
    let mut vm = vm(&config);
    let mut shape = InstanceClass::new("Shape", 16);
    shape.access_flags = config.klass.acc_abstract as i32;
    let shape = vm.define_instance(&shape).unwrap();
    let mut runnable = InstanceClass::new("Runnable", 16);
    runnable.access_flags = config.klass.acc_interface as i32;
    let runnable = vm.define_instance(&runnable).unwrap();
    let ints = vm.klasses().get(int_array(&vm)).unwrap();
    let int_mirror = vm.primitive_mirror(ElementKind::Int).unwrap();
    vm.install_tlab(0x1000, 0x2000).unwrap();

    let snippet = lower(
        &vm,
        AllocationRequest::DynamicNewInstance(DynamicNewInstance::new(Input::param("class"))),
    );
    for class in [0, shape.mirror, runnable.mirror, ints.mirror, int_mirror] {
        let outcome = vm.run(&snippet, &[("class", class as i64)]).unwrap();
        assert!(outcome.is_deoptimized(), "class {:#x}", class);
        assert!(vm.stores().is_empty());
    }
    assert!(vm.fallback_calls().is_empty());
}

#[test]
fn test_dynamic_array_fast_path() {
    let config = config();
    let mut vm = vm(&config);
    let int_mirror = vm.primitive_mirror(ElementKind::Int).unwrap();
    let ints = int_array(&vm);
    vm.install_tlab(0x1000, 0x2000).unwrap();

    let snippet = lower(
        &vm,
        AllocationRequest::DynamicNewArray(DynamicNewArray::new(Input::param("class"), Input::param("length"))),
    );
    let outcome = vm.run(&snippet, &[("class", int_mirror as i64), ("length", 3)]).unwrap();

    assert_eq!(outcome, Outcome::Object(0x1000));
    // 20 + 3 * 4 rounded to 32
    assert_eq!(vm.tlab().unwrap().top, 0x1020);
    assert_eq!(vm.memory().read(0x1010, Width::W32).unwrap(), 3);
    assert_eq!(vm.memory().read_word(0x1008).unwrap(), ints.0);
}

#[test]
fn test_dynamic_array_negative_length_deoptimizes() {
    let config = config();
    let mut vm = vm(&config);
    let int_mirror = vm.primitive_mirror(ElementKind::Int).unwrap();
    vm.install_tlab(0x1000, 0x2000).unwrap();

    let snippet = lower(
        &vm,
        AllocationRequest::DynamicNewArray(DynamicNewArray::new(Input::param("class"), Input::param("length"))),
    );
    let outcome = vm.run(&snippet, &[("class", int_mirror as i64), ("length", -1)]).unwrap();

    assert!(outcome.is_deoptimized());
    assert!(vm.stores().is_empty());
    assert_eq!(vm.tlab().unwrap(), ThreadAllocationBuffer::new(0x1000, 0x2000));

    let outcome = vm.run(&snippet, &[("class", 0), ("length", 1)]).unwrap();
    assert!(outcome.is_deoptimized());
}

#[test]
fn test_dynamic_array_without_array_class_deoptimizes() {
    let config = config();
    let mut vm = vm(&config);
    let point = instance(&mut vm, "Point", 16);
    vm.install_tlab(0x1000, 0x2000).unwrap();

    let snippet = lower(
        &vm,
        AllocationRequest::DynamicNewArray(DynamicNewArray::new(Input::param("class"), Input::param("length"))),
    );
    let outcome = vm.run(&snippet, &[("class", point.mirror as i64), ("length", 2)]).unwrap();
    assert!(outcome.is_deoptimized());
}

#[test]
fn test_dynamic_array_known_kind_folds_layout() {
    let config = config();
    let mut vm = vm(&config);
    let long_mirror = vm.primitive_mirror(ElementKind::Long).unwrap();
    vm.install_tlab(0x1000, 0x2000).unwrap();

    let request = DynamicNewArray {
        known_element_kind: Some(ElementKind::Long),
        ..DynamicNewArray::new(Input::param("class"), Input::param("length"))
    };
    let snippet = lower(&vm, AllocationRequest::DynamicNewArray(request));
    let layout_loads = snippet
        .instructions()
        .iter()
        .filter(|inst| matches!(inst, Inst::Load { location: Location::LayoutHelper, .. }))
        .count();
    assert_eq!(layout_loads, 0);

    let outcome = vm.run(&snippet, &[("class", long_mirror as i64), ("length", 2)]).unwrap();
    assert_eq!(outcome, Outcome::Object(0x1000));
    // 24 + 2 * 8
    assert_eq!(vm.tlab().unwrap().top, 0x1028);
}

#[test]
fn test_void_element_kind_rejected() {
    let config = config();
    let vm = vm(&config);
    let request = DynamicNewArray {
        known_element_kind: Some(ElementKind::Void),
        ..DynamicNewArray::new(Input::param("class"), Input::Const(1))
    };
    let err = Lowerer::new(config)
        .lower_dynamic_new_array(&request, &vm.tool(METHOD))
        .unwrap_err();
    assert_eq!(err, LoweringError::VoidElementKind);
}

#[test]
fn test_void_mirror_deoptimizes() {
    let config = config();
    let mut vm = vm(&config);
    let void_mirror = vm.primitive_mirror(ElementKind::Void).unwrap();
    vm.install_tlab(0x1000, 0x2000).unwrap();

    let snippet = lower(
        &vm,
        AllocationRequest::DynamicNewArray(DynamicNewArray::new(Input::param("class"), Input::Const(1))),
    );
    let outcome = vm.run(&snippet, &[("class", void_mirror as i64)]).unwrap();
    assert!(outcome.is_deoptimized());
}

#[test]
fn test_multi_array_marshals_dimensions() {
    let config = config();
    let mut vm = vm(&config);
    let ints = vm.define_array(ElementKind::Int, None).unwrap();
    let matrix = vm.define_array(ElementKind::Object, Some(&ints)).unwrap();

    let request = NewMultiArray {
        type_handle: matrix.handle,
        dimensions: vec![Input::Const(2), Input::param("n")],
    };
    let snippet = lower(&vm, AllocationRequest::NewMultiArray(request));
    let outcome = vm.run(&snippet, &[("n", 3)]).unwrap();

    let calls = vm.fallback_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].descriptor, FallbackDescriptor::NewMultiArray);
    assert_eq!(calls[0].arg(0), Some(matrix.klass as i64));
    assert_eq!(calls[0].arg(1), Some(2));

    let dims = calls[0].arg(2).unwrap() as u64;
    assert_eq!(vm.memory().read(dims, Width::W32).unwrap(), 2);
    assert_eq!(vm.memory().read(dims + 4, Width::W32).unwrap(), 3);

    let outer = outcome.object().unwrap();
    let row = vm.memory().read_word(outer + 24).unwrap();
    assert_eq!(vm.memory().read(row + 16, Width::W32).unwrap(), 3);
}

#[test]
fn test_multi_array_requires_rank() {
    let config = config();
    let mut vm = vm(&config);
    let ints = vm.define_array(ElementKind::Int, None).unwrap();
    let request = NewMultiArray {
        type_handle: ints.handle,
        dimensions: Vec::new(),
    };
    let err = Lowerer::new(config)
        .lower_new_multi_array(&request, &vm.tool(METHOD))
        .unwrap_err();
    assert_eq!(err, LoweringError::InvalidRank);
}

#[test]
fn test_verify_heap_detects_overzeroing() {
    let config = LoweringConfig {
        c_assertions: true,
        ..config()
    };
    let mut vm = vm(&config);
    vm.install_tlab(0x1000, 0x2000).unwrap();

    let snippet = lower(&vm, AllocationRequest::VerifyHeap);
    let outcome = vm.run(&snippet, &[]).unwrap();
    assert_eq!(outcome, Outcome::VmMessage("overzeroing of TLAB detected".to_string()));

    vm.memory_mut().write_word(0x1000, 1).unwrap();
    assert_eq!(vm.run(&snippet, &[]).unwrap(), Outcome::Completed);

    vm.install_tlab(0, 0).unwrap();
    assert_eq!(vm.run(&snippet, &[]).unwrap(), Outcome::Completed);
}

#[test]
fn test_verify_heap_disabled_is_empty() {
    let config = config();
    let mut vm = vm(&config);
    let snippet = lower(&vm, AllocationRequest::VerifyHeap);
    assert!(snippet.is_empty());
    assert_eq!(vm.run(&snippet, &[]).unwrap(), Outcome::Completed);
}

#[test]
fn test_profiling_counts_both_paths() {
    let config = LoweringConfig {
        profiling: crate::config::ProfilingConfig {
            enabled: true,
            mode: ProfileMode::AllocatedTypes,
        },
        ..config()
    };
    let mut vm = vm(&config);
    let ints = int_array(&vm);
    let snippet = lower(&vm, AllocationRequest::NewArray(NewArray::new(ints, Input::Const(5))));

    vm.install_tlab(0x1000, 0x2000).unwrap();
    vm.run(&snippet, &[]).unwrap();
    vm.install_tlab(0x1028, 0x1030).unwrap();
    vm.run(&snippet, &[]).unwrap();

    let counters = vm.counters();
    assert_eq!(counters.get("int[]", ALLOCATIONS), 2);
    assert_eq!(counters.get("int[]", BYTES_ALLOCATED), 80);
    assert_eq!(vm.fallback_calls().len(), 1);
}

#[test]
fn test_profiling_per_method() {
    let config = LoweringConfig {
        profiling: crate::config::ProfilingConfig {
            enabled: true,
            mode: ProfileMode::AllocatingMethods,
        },
        ..config()
    };
    let mut vm = vm(&config);
    let point = instance(&mut vm, "Point", 16);
    vm.install_tlab(0x1000, 0x2000).unwrap();

    let snippet = lower(&vm, AllocationRequest::NewInstance(NewInstance::new(point.handle)));
    vm.run(&snippet, &[]).unwrap();

    assert_eq!(vm.counters().get_in("", ALLOCATIONS, METHOD), 1);
    assert_eq!(vm.counters().get_in("", BYTES_ALLOCATED, METHOD), 16);
}

#[test]
fn test_injected_profiler_overrides_config() {
    let config = config();
    let mut vm = vm(&config);
    let point = instance(&mut vm, "Point", 16);
    vm.install_tlab(0x1000, 0x2000).unwrap();

    let lowerer = Lowerer::new(config).with_profiler(Box::new(CounterProfiler::new(ProfileMode::Total)));
    let snippet = lowerer
        .lower_new_instance(&NewInstance::new(point.handle), &vm.tool(METHOD))
        .unwrap();
    vm.run(&snippet, &[]).unwrap();
    assert_eq!(vm.counters().get("bytes", ALLOCATIONS), 1);
}

#[test]
fn test_profiling_disabled_emits_no_counters() {
    let config = config();
    let mut vm = vm(&config);
    let point = instance(&mut vm, "Point", 16);
    let snippet = lower(&vm, AllocationRequest::NewInstance(NewInstance::new(point.handle)));
    assert!(!snippet
        .instructions()
        .iter()
        .any(|inst| matches!(inst, Inst::Counter { .. })));
}

#[test]
fn test_tlab_disabled_always_calls_runtime() {
    let config = LoweringConfig {
        use_tlab: false,
        ..config()
    };
    let mut vm = vm(&config);
    let point = instance(&mut vm, "Point", 32);
    vm.install_tlab(0x1000, 0x2000).unwrap();

    let snippet = lower(&vm, AllocationRequest::NewInstance(NewInstance::new(point.handle)));
    assert!(snippet.first_store_to(Location::TlabTop).is_none());

    let outcome = vm.run(&snippet, &[]).unwrap();
    assert_eq!(vm.fallback_calls().len(), 1);
    assert_eq!(vm.tlab().unwrap().top, 0x1000);
    assert_eq!(vm.memory().region_of(outcome.object().unwrap()), Some("eden"));
}

#[test]
fn test_unfilled_instance_is_poisoned_under_assertions() {
    let config = config();
    let mut vm = vm(&config);
    let point = instance(&mut vm, "Point", 32);
    vm.install_tlab(0x1000, 0x2000).unwrap();
    vm.memory_mut().fill(0x1000, 0x1000, 0xAB).unwrap();

    let request = NewInstance {
        fill_contents: false,
        ..NewInstance::new(point.handle)
    };
    let snippet = lower(&vm, AllocationRequest::NewInstance(request));
    vm.run(&snippet, &[]).unwrap();

    assert_eq!(vm.memory().read_word(0x1010).unwrap(), POISON as u64);
    assert_eq!(vm.memory().read_word(0x1018).unwrap(), POISON as u64);
}

#[test]
fn test_unfilled_instance_untouched_without_assertions() {
    let config = LoweringConfig {
        assertions: false,
        ..LoweringConfig::default()
    };
    let mut vm = vm(&config);
    let point = instance(&mut vm, "Point", 32);
    vm.install_tlab(0x1000, 0x2000).unwrap();
    vm.memory_mut().fill(0x1000, 0x1000, 0xAB).unwrap();

    let request = NewInstance {
        fill_contents: false,
        ..NewInstance::new(point.handle)
    };
    let snippet = lower(&vm, AllocationRequest::NewInstance(request));
    vm.run(&snippet, &[]).unwrap();

    assert_eq!(vm.memory().read_word(0x1010).unwrap(), GARBAGE);
    assert_eq!(vm.memory().read_word(0x1008).unwrap(), point.klass);
}

#[test]
fn test_biased_locking_reads_live_prototype() {
    let config = LoweringConfig {
        use_biased_locking: true,
        ..config()
    };
    let mut vm = vm(&config);
    let point = instance(&mut vm, "Point", 16);
    vm.install_tlab(0x1000, 0x2000).unwrap();

    let snippet = lower(&vm, AllocationRequest::NewInstance(NewInstance::new(point.handle)));
    assert!(snippet
        .instructions()
        .iter()
        .any(|inst| matches!(inst, Inst::Load { location: Location::PrototypeMarkWord, .. })));

    vm.run(&snippet, &[]).unwrap();
    assert_eq!(vm.memory().read_word(0x1000).unwrap(), config.klass.biased_mark);
}

#[test]
fn test_unaligned_constant_size_rejected() {
    let config = config();
    let mut vm = vm(&config);
    let odd = instance(&mut vm, "Odd", 20);
    let err = Lowerer::new(config)
        .lower_new_instance(&NewInstance::new(odd.handle), &vm.tool(METHOD))
        .unwrap_err();
    assert_eq!(err, LoweringError::UnalignedSize { size: 20 });
}

#[test]
fn test_unaligned_dynamic_size_trips_assertion() {
    let config = config();
    let mut vm = vm(&config);
    let odd = instance(&mut vm, "Odd", 20);
    vm.install_tlab(0x1000, 0x2000).unwrap();

    let snippet = lower(
        &vm,
        AllocationRequest::DynamicNewInstance(DynamicNewInstance::new(Input::param("class"))),
    );
    let err = vm.run(&snippet, &[("class", odd.mirror as i64)]).unwrap_err();
    assert_eq!(err, ExecError::AssertionFailed("unaligned object size"));
}

#[test]
fn test_snippet_counters_track_fill_shape() {
    let config = LoweringConfig {
        snippet_counters: true,
        ..config()
    };
    let mut vm = vm(&config);
    let small = instance(&mut vm, "Small", 32);
    let large = instance(&mut vm, "Large", 256);
    vm.install_tlab(0x1000, 0x2000).unwrap();

    let snippet = lower(&vm, AllocationRequest::NewInstance(NewInstance::new(small.handle)));
    vm.run(&snippet, &[]).unwrap();
    let snippet = lower(&vm, AllocationRequest::NewInstance(NewInstance::new(large.handle)));
    vm.run(&snippet, &[]).unwrap();

    assert_eq!(vm.counters().get("NewInstance", "tlabSeqInit"), 1);
    assert_eq!(vm.counters().get("NewInstance", "tlabLoopInit"), 1);
}

#[test]
fn test_prefetch_emitted_only_with_style() {
    let mut config = config();
    config.prefetch.style = 1;
    config.prefetch.lines = 3;
    let mut vm = vm(&config);
    let ints = int_array(&vm);
    vm.install_tlab(0x1000, 0x2000).unwrap();

    let snippet = lower(&vm, AllocationRequest::NewArray(NewArray::new(ints, Input::Const(4))));
    let prefetches = snippet
        .instructions()
        .iter()
        .filter(|inst| matches!(inst, Inst::Prefetch { .. }))
        .count();
    assert_eq!(prefetches, 3);
    // prefetching past the TLAB end is harmless
    assert_eq!(vm.run(&snippet, &[]).unwrap(), Outcome::Object(0x1000));

    let snippet = lower(&vm, AllocationRequest::NewArray(NewArray::new(ints, Input::Const(4))));
    let plain = Lowerer::new(LoweringConfig { prefetch: Default::default(), ..config.clone() })
        .lower(&AllocationRequest::NewArray(NewArray::new(ints, Input::Const(4))), &vm.tool(METHOD))
        .unwrap();
    assert_eq!(snippet.len(), plain.len() + 3);
}
