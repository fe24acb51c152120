use std::path::PathBuf;
use tlabgen::alloc::{
    AllocationRequest, DynamicNewArray, DynamicNewInstance, Input, Lowerer, NewArray, NewInstance, NewMultiArray,
};
use tlabgen::runtime::{InstanceClass, KlassRef, SimulatedVm};
use tlabgen::{logging, ElementKind, LoweringConfig};

const USAGE: &str = "Usage: tlabgen [OPTIONS] <shape>

Shapes:
  instance          Instance of a known class
  array             Array of a known element kind
  dynamic-instance  Instance of a class passed at run time
  dynamic-array     Array whose element class is passed at run time
  multi-array       Multi-dimensional array
  verify-heap       TLAB self-check

Options:
  --config FILE     Load the lowering configuration from FILE
  --print-config    Print the default configuration and exit
  --size N          Instance size in bytes (default: 32)
  --length N        Array length (default: 5)
  --dynamic-length  Pass the array length at run time
  --kind K          Element kind (default: int)
  --known-kind      Tell the lowering the element kind of a dynamic array
  --dims A,B,...    Dimensions of a multi-array (default: 2,3)
  --no-fill         Leave the object body uninitialized
  --run             Execute the snippet on a simulated VM
  --tlab TOP:END    TLAB bounds for --run (default: 0x100000:0x200000)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Instance,
    Array,
    DynamicInstance,
    DynamicArray,
    MultiArray,
    VerifyHeap,
}

impl Shape {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "instance" => Shape::Instance,
            "array" => Shape::Array,
            "dynamic-instance" => Shape::DynamicInstance,
            "dynamic-array" => Shape::DynamicArray,
            "multi-array" => Shape::MultiArray,
            "verify-heap" => Shape::VerifyHeap,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
struct CliConfig {
    config_path: Option<PathBuf>,
    print_config: bool,
    shape: Option<Shape>,
    size: u32,
    length: i64,
    dynamic_length: bool,
    kind: ElementKind,
    known_kind: bool,
    dims: Vec<i64>,
    fill_contents: bool,
    run: bool,
    tlab: (u64, u64),
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            print_config: false,
            shape: None,
            size: 32,
            length: 5,
            dynamic_length: false,
            kind: ElementKind::Int,
            known_kind: false,
            dims: vec![2, 3],
            fill_contents: true,
            run: false,
            tlab: (0x10_0000, 0x20_0000),
        }
    }
}

fn parse_int(value: &str) -> Result<i64, String> {
    let parsed = match value.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|_| format!("Invalid number: {}", value))
}

fn next_value<'a>(args: &'a [String], i: &mut usize, option: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires an argument", option))
}

fn parse_args(args: &[String]) -> Result<CliConfig, String> {
    let mut config = CliConfig::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => return Err(USAGE.to_string()),
            "--config" => config.config_path = Some(PathBuf::from(next_value(args, &mut i, "--config")?)),
            "--print-config" => config.print_config = true,
            "--size" => {
                let size = parse_int(next_value(args, &mut i, "--size")?)?;
                config.size = u32::try_from(size).map_err(|_| format!("Invalid size: {}", size))?;
            }
            "--length" => config.length = parse_int(next_value(args, &mut i, "--length")?)?,
            "--dynamic-length" => config.dynamic_length = true,
            "--kind" => {
                let name = next_value(args, &mut i, "--kind")?;
                config.kind = ElementKind::parse(name).ok_or_else(|| format!("Unknown element kind: {}", name))?;
            }
            "--known-kind" => config.known_kind = true,
            "--dims" => {
                config.dims = next_value(args, &mut i, "--dims")?
                    .split(',')
                    .map(|d| parse_int(d.trim()))
                    .collect::<Result<_, _>>()?;
            }
            "--no-fill" => config.fill_contents = false,
            "--run" => config.run = true,
            "--tlab" => {
                let value = next_value(args, &mut i, "--tlab")?;
                let (top, end) = value
                    .split_once(':')
                    .ok_or_else(|| format!("Expected TOP:END, got {}", value))?;
                config.tlab = (parse_int(top)? as u64, parse_int(end)? as u64);
            }
            arg if arg.starts_with("--") => {
                return Err(format!("Unknown option: {}", arg));
            }
            shape => {
                config.shape = Some(Shape::parse(shape).ok_or_else(|| format!("Unknown shape: {}\n\n{}", shape, USAGE))?);
            }
        }
        i += 1;
    }

    if config.shape.is_none() && !config.print_config {
        return Err(USAGE.to_string());
    }
    Ok(config)
}

/// Classes the request refers to, defined in a fresh VM
struct Fixture {
    vm: SimulatedVm,
    demo: KlassRef,
    array: KlassRef,
    args: Vec<(&'static str, i64)>,
}

fn array_of(vm: &mut SimulatedVm, kind: ElementKind, demo: &KlassRef) -> Result<KlassRef, String> {
    let component = (kind == ElementKind::Object).then_some(demo);
    vm.define_array(kind, component).map_err(|e| e.to_string())
}

fn fixture(cli: &CliConfig, config: LoweringConfig) -> Result<Fixture, String> {
    let mut vm = SimulatedVm::new(config).map_err(|e| e.to_string())?;
    vm.define_primitive_arrays().map_err(|e| e.to_string())?;
    let demo = vm
        .define_instance(&InstanceClass::new("Demo", cli.size))
        .map_err(|e| e.to_string())?;

    let mut array = array_of(&mut vm, cli.kind, &demo)?;
    if cli.shape == Some(Shape::MultiArray) {
        for _ in 1..cli.dims.len() {
            array = vm.define_array(ElementKind::Object, Some(&array)).map_err(|e| e.to_string())?;
        }
    }

    let mut args = Vec::new();
    if cli.dynamic_length || cli.shape == Some(Shape::DynamicArray) {
        args.push(("length", cli.length));
    }
    match cli.shape {
        Some(Shape::DynamicInstance) => args.push(("class", demo.mirror as i64)),
        Some(Shape::DynamicArray) => {
            let mirror = if cli.kind == ElementKind::Object {
                demo.mirror
            } else {
                vm.primitive_mirror(cli.kind).map_err(|e| e.to_string())?
            };
            args.push(("class", mirror as i64));
        }
        _ => {}
    }

    vm.install_tlab(cli.tlab.0, cli.tlab.1).map_err(|e| e.to_string())?;
    Ok(Fixture { vm, demo, array, args })
}

fn request(cli: &CliConfig, fixture: &Fixture) -> AllocationRequest {
    let length = if cli.dynamic_length {
        Input::param("length")
    } else {
        Input::Const(cli.length)
    };
    match cli.shape {
        Some(Shape::Instance) | None => AllocationRequest::NewInstance(NewInstance {
            fill_contents: cli.fill_contents,
            ..NewInstance::new(fixture.demo.handle)
        }),
        Some(Shape::Array) => AllocationRequest::NewArray(NewArray {
            fill_contents: cli.fill_contents,
            ..NewArray::new(fixture.array.handle, length)
        }),
        Some(Shape::DynamicInstance) => AllocationRequest::DynamicNewInstance(DynamicNewInstance {
            fill_contents: cli.fill_contents,
            ..DynamicNewInstance::new(Input::param("class"))
        }),
        Some(Shape::DynamicArray) => AllocationRequest::DynamicNewArray(DynamicNewArray {
            known_element_kind: cli.known_kind.then_some(cli.kind),
            fill_contents: cli.fill_contents,
            ..DynamicNewArray::new(Input::param("class"), Input::param("length"))
        }),
        Some(Shape::MultiArray) => AllocationRequest::NewMultiArray(NewMultiArray {
            type_handle: fixture.array.handle,
            dimensions: cli.dims.iter().copied().map(Input::Const).collect(),
        }),
        Some(Shape::VerifyHeap) => AllocationRequest::VerifyHeap,
    }
}

fn run(cli: &CliConfig) -> Result<(), String> {
    if cli.print_config {
        println!("{}", LoweringConfig::generate_default());
        return Ok(());
    }

    let config = match &cli.config_path {
        Some(path) => LoweringConfig::load(path).map_err(|e| e.to_string())?,
        None => LoweringConfig::discover(),
    };

    let mut fixture = fixture(cli, config.clone())?;
    let request = request(cli, &fixture);
    let snippet = Lowerer::new(config)
        .lower(&request, &fixture.vm.tool("Demo.main"))
        .map_err(|e| e.to_string())?;
    println!("{}", snippet);

    if cli.run {
        let args = fixture.args.clone();
        let outcome = fixture.vm.run(&snippet, &args).map_err(|e| e.to_string())?;
        println!("outcome: {:?}", outcome);
        for call in fixture.vm.fallback_calls() {
            println!("fallback: {}", call);
        }
        let tlab = fixture.vm.tlab().map_err(|e| e.to_string())?;
        println!("tlab: top={:#x} end={:#x}", tlab.top, tlab.end);

        let counters = fixture.vm.counters();
        if !counters.is_empty() {
            println!("{}", counters.to_json().map_err(|e| e.to_string())?);
        }
    }
    Ok(())
}

fn main() {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let result = parse_args(&args).and_then(|cli| run(&cli));
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
