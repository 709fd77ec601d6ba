use arch::obj::{ObjectModule, RelocState, RelocationRecord, Symbol, SymbolKind, SymbolTable};
use siclink::{link, LinkError};

fn lines(source: &str) -> Vec<String> {
    source.lines().map(str::to_string).collect()
}

fn assemble(name: &str, source: &str) -> ObjectModule {
    sicasm::assemble(name, &lines(source)).unwrap()
}

const ALPHA: &str = "\
ALPHA   START   0
        EXTDEF  AMAIN
AMAIN   LDA     #1
        HLT
AVAL    WORD    5
        END     AMAIN
";

const BETA: &str = "\
BETA    START   0
        EXTDEF  BVAL
        LDA     #2
        HLT
BVAL    WORD    9
        END
";

#[test]
fn merge_concatenates_and_offsets_second_module() {
    let a = assemble("alpha", ALPHA);
    let b = assemble("beta", BETA);
    let (l1, l2) = (a.length(), b.length());
    let bval = b.symbols.address_of("BVAL").unwrap();

    let linked = link(vec![a, b], 0, false, "AB").unwrap();

    assert_eq!(linked.program_name, "AB");
    assert_eq!(linked.length(), l1 + l2);
    assert_eq!(linked.state, RelocState::Pending);
    // Module-2 symbols move by exactly L1.
    assert_eq!(linked.symbols.address_of("BVAL"), Ok(bval + l1));
    // Module-1 symbols stay put in deferred mode at load address 0.
    assert_eq!(linked.symbols.address_of("AVAL"), Ok(4));
    // Entry comes from the first module.
    assert_eq!(linked.start_address, 0);
}

#[test]
fn cross_module_reference_resolves_against_the_merge() {
    let main = assemble(
        "main",
        "\
MAIN    START   0
        EXTREF  BVAL
PTR     +LDA    BVAL
        HLT
        END
",
    );
    let l1 = main.length();
    let b = assemble("beta", BETA);
    let bval_final = b.symbols.address_of("BVAL").unwrap() + l1;

    let linked = link(vec![main, b], 0, false, "PROG").unwrap();

    // The placeholder was replaced by the real definition.
    let merged = linked.symbols.get("BVAL").unwrap();
    assert_eq!(merged.kind, SymbolKind::Exported);
    assert_eq!(merged.address, bval_final);
    // Record offsets are module-relative no longer: still 1 here (module 1).
    assert_eq!(
        linked.relocations,
        vec![RelocationRecord { offset: 1, length: 3, symbol: "BVAL".into(), pc_relative: false }]
    );
}

#[test]
fn full_relocation_produces_an_absolute_image() {
    let main = assemble(
        "main",
        "\
MAIN    START   0
        EXTREF  BVAL
        +LDA    BVAL
        HLT
        END
",
    );
    let l1 = main.length();
    let b = assemble("beta", BETA);
    let bval = b.symbols.address_of("BVAL").unwrap();
    let load_address = 0x200;

    let linked = link(vec![main, b], load_address, true, "ABS").unwrap();

    assert_eq!(linked.state, RelocState::Applied);
    assert_eq!(linked.symbols.address_of("BVAL"), Ok(bval + l1 + load_address));
    assert_eq!(linked.start_address, load_address);
    // The format-4 field now holds the final address (e flag on top).
    let field = ((linked.code[1] as u32) << 16)
        | ((linked.code[2] as u32) << 8)
        | linked.code[3] as u32;
    assert_eq!(field & 0x0F_FFFF, bval + l1 + load_address);
    assert_eq!(field >> 20, 0x1); // e bit untouched
}

#[test]
fn unresolved_external_fails() {
    let main = assemble(
        "main",
        "\
MAIN    START   0
        EXTREF  GHOST
        +JSUB   GHOST
        HLT
        END
",
    );
    assert_eq!(
        link(vec![main], 0, false, "X"),
        Err(LinkError::UnresolvedSymbol("GHOST".into()))
    );
}

#[test]
fn colliding_definitions_fail() {
    let a = assemble(
        "a",
        "\
A       START   0
SHARED  WORD    1
        END
",
    );
    let b = assemble(
        "b",
        "\
B       START   0
SHARED  WORD    2
        END
",
    );
    assert_eq!(
        link(vec![a, b], 0, false, "X"),
        Err(LinkError::DuplicateSymbol("SHARED".into()))
    );
}

#[test]
fn empty_input_fails() {
    assert_eq!(link(vec![], 0, false, "X"), Err(LinkError::NoModules));
}

#[test]
fn layout_past_the_address_space_fails() {
    let module = ObjectModule {
        program_name: "BIG".into(),
        code: vec![0; 16],
        start_address: 0,
        symbols: SymbolTable::new(),
        relocations: vec![],
        raw_source: vec![],
        state: RelocState::Pending,
    };
    assert!(matches!(
        link(vec![module], 0xFF_FFF8, false, "X"),
        Err(LinkError::LayoutOverflow { .. })
    ));
    let fine = ObjectModule {
        program_name: "OK".into(),
        code: vec![0; 8],
        start_address: 0,
        symbols: {
            let mut t = SymbolTable::new();
            t.insert(Symbol { name: "S".into(), address: 0, kind: SymbolKind::Local }).unwrap();
            t
        },
        relocations: vec![],
        raw_source: vec![],
        state: RelocState::Pending,
    };
    assert!(link(vec![fine], 0xFF_FFF8, false, "X").is_ok());
}
