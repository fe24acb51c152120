use super::*;
use crate::alloc::{FallbackCall, FallbackDescriptor};
use crate::layout::LayoutHelper;
use crate::meta::{TypeHandle, TypeResolver};
use crate::snippet::Width;
use smallvec::smallvec;

const METASPACE: u64 = 0x4000;
const MIRRORS: u64 = 0x8000;
const EDEN: u64 = 0x10000;

fn setup(config: LoweringConfig) -> (Arc<LoweringConfig>, Memory, KlassTable, EdenRuntime) {
    let config = Arc::new(config);
    let mut memory = Memory::new();
    memory.map("metaspace", METASPACE, 0x1000).unwrap();
    memory.map("mirrors", MIRRORS, 0x1000).unwrap();
    memory.map("eden", EDEN, 0x1000).unwrap();
    let klasses = KlassTable::new(Arc::clone(&config), (METASPACE, 0x1000), (MIRRORS, 0x1000));
    let eden = EdenRuntime::new(Arc::clone(&config), EDEN, 0x1000);
    (config, memory, klasses, eden)
}

fn call(descriptor: FallbackDescriptor, args: &[i64]) -> FallbackCall {
    FallbackCall {
        descriptor,
        args: args.iter().copied().collect(),
    }
}

#[test]
fn test_klass_table_writes_metadata() {
    let (config, mut memory, mut klasses, _) = setup(LoweringConfig::default());
    let point = klasses.define_instance(&mut memory, &InstanceClass::new("Point", 32)).unwrap();

    let lh = memory.read(point.klass + config.klass.layout_helper_offset as u64, Width::W32).unwrap();
    assert_eq!(lh, 32);
    let init = memory.read(point.klass + config.klass.init_state_offset as u64, Width::W8).unwrap();
    assert_eq!(init, config.klass.fully_initialized);
    let hub = memory.read_word(point.mirror + config.klass.mirror_klass_offset as u64).unwrap();
    assert_eq!(hub, point.klass);

    let resolved = klasses.resolve(point.handle).unwrap();
    assert_eq!(resolved.name, "Point");
    assert!(!resolved.is_array());
    assert_eq!(klasses.find("Point"), Some(point));
    assert!(klasses.resolve(TypeHandle(0xDEAD)).is_none());
}

#[test]
fn test_array_classes_link_mirrors() {
    let (config, mut memory, mut klasses, _) = setup(LoweringConfig::default());
    let int_mirror = klasses.primitive_mirror(&mut memory, ElementKind::Int).unwrap();
    let int_array = klasses.define_array(&mut memory, ElementKind::Int, None).unwrap();

    let linked = memory
        .read_word(int_mirror + config.klass.mirror_array_klass_offset as u64)
        .unwrap();
    assert_eq!(linked, int_array.klass);
    assert_eq!(memory.read_word(int_mirror + config.klass.mirror_klass_offset as u64).unwrap(), 0);
    assert_eq!(klasses.array_class_of(ElementKind::Int).unwrap().klass, int_array.klass);

    let point = klasses.define_instance(&mut memory, &InstanceClass::new("Point", 32)).unwrap();
    let points = klasses.define_array(&mut memory, ElementKind::Object, Some(&point)).unwrap();
    assert_eq!(klasses.name_of(points.klass), Some("Point[]"));
    let linked = memory
        .read_word(point.mirror + config.klass.mirror_array_klass_offset as u64)
        .unwrap();
    assert_eq!(linked, points.klass);
    // component arrays do not claim the generic Object[] slot
    assert!(klasses.array_class_of(ElementKind::Object).is_none());
}

#[test]
fn test_void_array_rejected() {
    let (_, mut memory, mut klasses, _) = setup(LoweringConfig::default());
    assert!(klasses.define_array(&mut memory, ElementKind::Void, None).is_err());
    assert!(klasses.is_empty());
}

#[test]
fn test_instance_smaller_than_header_rejected() {
    let (_, mut memory, mut klasses, _) = setup(LoweringConfig::default());
    for size in [0, 8, 15] {
        let result = klasses.define_instance(&mut memory, &InstanceClass::new("Tiny", size));
        assert!(matches!(result, Err(ExecError::Exception(_))), "size {size}");
    }
    assert!(klasses.is_empty());
    assert!(klasses.define_instance(&mut memory, &InstanceClass::new("Empty", 16)).is_ok());

    let mut compressed = LoweringConfig::default();
    compressed.layout.compressed_class_pointers = true;
    let (_, mut memory, mut klasses, _) = setup(compressed);
    assert!(klasses.define_instance(&mut memory, &InstanceClass::new("Empty", 12)).is_ok());
}

#[test]
fn test_eden_formats_instances() {
    let (config, mut memory, mut klasses, mut eden) = setup(LoweringConfig::default());
    let point = klasses.define_instance(&mut memory, &InstanceClass::new("Point", 24)).unwrap();

    let first = eden
        .call(&mut memory, &call(FallbackDescriptor::NewInstance, &[point.klass as i64]))
        .unwrap();
    let second = eden
        .call(&mut memory, &call(FallbackDescriptor::NewInstance, &[point.klass as i64]))
        .unwrap();
    assert_eq!(first, EDEN);
    assert_eq!(second, EDEN + 24);
    assert_eq!(memory.read_word(first).unwrap(), config.klass.unlocked_mark);
    assert_eq!(memory.read_word(first + 8).unwrap(), point.klass);
    assert_eq!(eden.calls().len(), 2);
}

#[test]
fn test_eden_arrays_and_dynamic_calls() {
    let (config, mut memory, mut klasses, mut eden) = setup(LoweringConfig::default());
    let int_array = klasses.define_array(&mut memory, ElementKind::Int, None).unwrap();
    let int_mirror = klasses.primitive_mirror(&mut memory, ElementKind::Int).unwrap();

    let array = eden
        .call(&mut memory, &call(FallbackDescriptor::NewArray, &[int_array.klass as i64, 5, 1]))
        .unwrap();
    let length_offset = config.layout.array_length_offset() as u64;
    assert_eq!(memory.read(array + length_offset, Width::W32).unwrap(), 5);
    assert_eq!(memory.read_word(array + 8).unwrap(), int_array.klass);
    // 20 header bytes + 5 ints, rounded to 40
    assert_eq!(eden.top(), EDEN + 40);

    let dynamic = eden
        .call(&mut memory, &call(FallbackDescriptor::DynamicNewArray, &[int_mirror as i64, 2]))
        .unwrap();
    assert_eq!(dynamic, EDEN + 40);
    assert_eq!(memory.read(dynamic + length_offset, Width::W32).unwrap(), 2);

    let err = eden
        .call(&mut memory, &call(FallbackDescriptor::NewArray, &[int_array.klass as i64, -1, 1]))
        .unwrap_err();
    assert!(matches!(err, ExecError::Exception(_)));
}

#[test]
fn test_eden_dynamic_instance_checks_flags() {
    let (config, mut memory, mut klasses, mut eden) = setup(LoweringConfig::default());
    let mut shape = InstanceClass::new("Shape", 16);
    shape.access_flags = config.klass.acc_abstract as i32;
    let shape = klasses.define_instance(&mut memory, &shape).unwrap();
    let err = eden
        .call(&mut memory, &call(FallbackDescriptor::DynamicNewInstance, &[shape.mirror as i64]))
        .unwrap_err();
    assert!(matches!(err, ExecError::Exception(_)));

    let err = eden
        .call(&mut memory, &call(FallbackDescriptor::DynamicNewInstance, &[0]))
        .unwrap_err();
    assert_eq!(err, ExecError::Exception("NullPointerException".to_string()));
}

#[test]
fn test_eden_multi_array_links_rows() {
    let (_, mut memory, mut klasses, mut eden) = setup(LoweringConfig::default());
    let ints = klasses.define_array(&mut memory, ElementKind::Int, None).unwrap();
    let matrix = klasses.define_array(&mut memory, ElementKind::Object, Some(&ints)).unwrap();
    memory.map("dims", 0x20000, 16).unwrap();
    memory.write(0x20000, Width::W32, 2).unwrap();
    memory.write(0x20004, Width::W32, 3).unwrap();

    let outer = eden
        .call(
            &mut memory,
            &call(FallbackDescriptor::NewMultiArray, &[matrix.klass as i64, 2, 0x20000]),
        )
        .unwrap();
    // Object[] base 24, two 8-byte slots
    let row = memory.read_word(outer + 24).unwrap();
    assert_ne!(row, 0);
    assert_eq!(memory.read_word(row + 8).unwrap(), ints.klass);
    assert_eq!(memory.read(row + 16, Width::W32).unwrap(), 3);
    assert_eq!(eden.calls().len(), 1);
}

#[test]
fn test_eden_rejects_wrong_arity() {
    let (_, mut memory, _, mut eden) = setup(LoweringConfig::default());
    let bad = FallbackCall {
        descriptor: FallbackDescriptor::NewArray,
        args: smallvec![1, 2],
    };
    let err = eden.call(&mut memory, &bad).unwrap_err();
    assert_eq!(
        err,
        ExecError::BadFallbackCall {
            descriptor: FallbackDescriptor::NewArray,
            found: 2
        }
    );
}

#[test]
fn test_eden_compressed_hub() {
    let mut config = LoweringConfig::default();
    config.layout.compressed_class_pointers = true;
    config.layout.narrow_klass_base = METASPACE;
    config.layout.narrow_klass_shift = 3;
    let (_, mut memory, mut klasses, mut eden) = setup(config);
    let point = klasses.define_instance(&mut memory, &InstanceClass::new("Point", 16)).unwrap();
    let object = eden
        .call(&mut memory, &call(FallbackDescriptor::NewInstance, &[point.klass as i64]))
        .unwrap();
    let narrow = memory.read(object + 8, Width::W32).unwrap();
    assert_eq!(narrow as u64, (point.klass - METASPACE) >> 3);
}

#[test]
fn test_vm_install_tlab_maps_once() {
    let mut vm = SimulatedVm::new(LoweringConfig::default()).unwrap();
    vm.install_tlab(1000, 2000).unwrap();
    assert_eq!(vm.memory().region_of(1500), Some("tlab"));
    assert_eq!(vm.tlab().unwrap(), ThreadAllocationBuffer::new(1000, 2000));

    // shrinking inside the mapped range reuses it
    vm.install_tlab(1200, 1800).unwrap();
    assert_eq!(vm.tlab().unwrap(), ThreadAllocationBuffer::new(1200, 1800));
}

#[test]
fn test_vm_defines_primitive_arrays() {
    let mut vm = SimulatedVm::new(LoweringConfig::default()).unwrap();
    vm.define_primitive_arrays().unwrap();
    for kind in ElementKind::ARRAYABLE {
        let class = vm.klasses().array_class_of(kind).unwrap();
        assert_eq!(class.layout_helper, LayoutHelper::array_of(&vm.config().layout, kind));
    }
}
