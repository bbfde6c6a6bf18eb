//! End-to-end tests: assemble, emit, load, run.

use crate::arch::{opcode_of, Opcode, RegisterAccess};
use crate::asm::assemble_source;
use crate::elf::loader::LoadedImage;
use crate::elf::writer::{write_object, WriteParams};
use crate::errors::Trap;
use crate::vm::process::Process;
use crate::vm::value::{BoxedObject, Value};
use crate::vm::{QuantumOutcome, Scheduler};

fn build_image(source: &str) -> LoadedImage {
    let parts = assemble_source(source, "test.asm").unwrap();
    let bytes = write_object(&WriteParams {
        text: &parts.text,
        rodata: &parts.rodata,
        symbols: &parts.symbols,
        strtab: &parts.strtab,
        relocations: &parts.relocations,
        entry: parts.entry,
    });
    LoadedImage::load(&bytes).unwrap()
}

fn start(source: &str) -> Process {
    let image = build_image(source);
    let entry = image.entry.expect("test programs declare an entry point");
    Process::new(image, entry)
}

/// Runs a program to completion and returns the final process state.
fn run(source: &str) -> Result<Process, Trap> {
    let mut proc = start(source);
    Scheduler::new().run(&mut proc)?;
    Ok(proc)
}

fn local(proc: &Process, index: u8) -> Value {
    proc.read(RegisterAccess::local(index)).unwrap()
}

#[test]
fn empty_program_halts_cleanly() {
    let image = build_image(".function: [[entry_point]] main\n    return\n.end");
    assert_eq!(image.text.len(), 2);
    assert_eq!(opcode_of(image.text[0]), Opcode::Halt as u16);
    assert_eq!(image.entry, Some(1));

    let table = image.function_table();
    let (name, _) = &table[&8];
    assert_eq!(name, "main");

    let proc = run(".function: [[entry_point]] main\n    return\n.end").unwrap();
    // The final RETURN popped the root frame.
    assert!(proc.frames.is_empty());
}

#[test]
fn li_boundary_value_materializes_exactly() {
    let proc = run(
        ".function: [[entry_point]] main\n\
         \x20   li %1, 0xdeadbeefdeadbeef\n\
         \x20   halt\n\
         .end",
    )
    .unwrap();
    assert_eq!(local(&proc, 1), Value::Unsigned(0xdead_beef_dead_beef));
}

#[test]
fn li_signed_value_materializes_exactly() {
    let proc = run(
        ".function: [[entry_point]] main\n\
         \x20   li %1, -2\n\
         \x20   halt\n\
         .end",
    )
    .unwrap();
    assert_eq!(local(&proc, 1), Value::Signed(-2));
}

#[test]
fn li_low_24_emits_single_addiu() {
    let image = build_image(
        ".function: [[entry_point]] main\n\
         \x20   li %1, 0x00bedead\n\
         \x20   halt\n\
         .end",
    );
    // Guard word, one ADDIU, HALT: the fast path emitted no LUI or MUL.
    assert_eq!(image.text.len(), 3);
    assert_eq!(opcode_of(image.text[1]), Opcode::Addiu as u16);

    let proc = run(
        ".function: [[entry_point]] main\n\
         \x20   li %1, 0x00bedead\n\
         \x20   halt\n\
         .end",
    )
    .unwrap();
    assert_eq!(local(&proc, 1), Value::Unsigned(0x00be_dead));
}

#[test]
fn division_by_zero_traps() {
    let err = run(
        ".function: [[entry_point]] main\n\
         \x20   li %1, 1\n\
         \x20   li %2, 0\n\
         \x20   div %3, %1, %2\n\
         \x20   halt\n\
         .end",
    )
    .unwrap_err();
    assert!(matches!(err, Trap::DivisionByZero { .. }));
}

#[test]
fn string_constant_boxes_from_rodata() {
    let proc = run(
        ".label: greeting string \"hi\" * 3\n\
         .function: [[entry_point]] main\n\
         \x20   string %1, greeting\n\
         \x20   halt\n\
         .end",
    )
    .unwrap();
    assert_eq!(
        local(&proc, 1),
        Value::Boxed(BoxedObject::Str("hihihi".into()))
    );
}

#[test]
fn string_literal_boxes_inline_constant() {
    let proc = run(
        ".function: [[entry_point]] main\n\
         \x20   string %1, \"hello\"\n\
         \x20   halt\n\
         .end",
    )
    .unwrap();
    assert_eq!(
        local(&proc, 1),
        Value::Boxed(BoxedObject::Str("hello".into()))
    );
}

#[test]
fn cross_function_call_returns_value() {
    let proc = run(
        ".function: f\n\
         \x20   li %0, 42\n\
         \x20   return\n\
         .end\n\
         .function: [[entry_point]] main\n\
         \x20   call %1, f\n\
         \x20   halt\n\
         .end",
    )
    .unwrap();
    assert_eq!(local(&proc, 1), Value::Unsigned(42));
}

#[test]
fn call_passes_arguments_as_parameters() {
    let proc = run(
        ".function: add_seven\n\
         \x20   addi %0, %0.p, 7\n\
         \x20   return\n\
         .end\n\
         .function: [[entry_point]] main\n\
         \x20   frame %1\n\
         \x20   addi %0.a, void, 35\n\
         \x20   call %1, add_seven\n\
         \x20   halt\n\
         .end",
    )
    .unwrap();
    assert_eq!(local(&proc, 1), Value::Signed(42));
}

#[test]
fn atom_resolves_through_symtab() {
    let proc = run(
        ".label: answer atom everything\n\
         .function: [[entry_point]] main\n\
         \x20   atom %1, answer\n\
         \x20   halt\n\
         .end",
    )
    .unwrap();
    assert_eq!(
        local(&proc, 1),
        Value::Boxed(BoxedObject::Atom("everything".into()))
    );
}

#[test]
fn atom_equality_compares_names() {
    let proc = run(
        ".label: a atom left\n\
         .label: b atom left\n\
         .label: c atom right\n\
         .function: [[entry_point]] main\n\
         \x20   atom %1, a\n\
         \x20   atom %2, b\n\
         \x20   atom %3, c\n\
         \x20   eq %4, %1, %2\n\
         \x20   eq %5, %1, %3\n\
         \x20   halt\n\
         .end",
    )
    .unwrap();
    assert_eq!(local(&proc, 4), Value::Unsigned(1));
    assert_eq!(local(&proc, 5), Value::Unsigned(0));
}

#[test]
fn move_transfers_and_leaves_void() {
    let proc = run(
        ".function: [[entry_point]] main\n\
         \x20   string %1, \"payload\"\n\
         \x20   move %2, %1\n\
         \x20   halt\n\
         .end",
    )
    .unwrap();
    assert!(local(&proc, 1).is_void());
    assert_eq!(
        local(&proc, 2),
        Value::Boxed(BoxedObject::Str("payload".into()))
    );
}

#[test]
fn delete_clears_boxed_register() {
    let proc = run(
        ".function: [[entry_point]] main\n\
         \x20   string %1, \"gone\"\n\
         \x20   delete %1\n\
         \x20   halt\n\
         .end",
    )
    .unwrap();
    assert!(local(&proc, 1).is_void());
}

#[test]
fn copy_duplicates_boxed_value() {
    let proc = run(
        ".function: [[entry_point]] main\n\
         \x20   string %1, \"twice\"\n\
         \x20   copy %2, %1\n\
         \x20   halt\n\
         .end",
    )
    .unwrap();
    assert_eq!(local(&proc, 1), local(&proc, 2));
}

#[test]
fn lui_sign_extends_and_luiu_does_not() {
    let proc = run(
        ".function: [[entry_point]] main\n\
         \x20   lui %1, 0xfffffffff\n\
         \x20   luiu %2, 0xfffffffff\n\
         \x20   halt\n\
         .end",
    )
    .unwrap();
    assert_eq!(local(&proc, 1), Value::Signed((0xf_ffff_ffffu64 << 28) as i64));
    assert_eq!(local(&proc, 2), Value::Unsigned(0xf_ffff_ffffu64 << 28));
}

#[test]
fn typed_arithmetic_follows_opcode_signedness() {
    let proc = run(
        ".function: [[entry_point]] main\n\
         \x20   addi %1, void, 5\n\
         \x20   addiu %2, void, 5\n\
         \x20   halt\n\
         .end",
    )
    .unwrap();
    assert_eq!(local(&proc, 1), Value::Signed(5));
    assert_eq!(local(&proc, 2), Value::Unsigned(5));
}

#[test]
fn aa_rounds_heap_break_to_alignment() {
    let proc = run(
        ".function: [[entry_point]] main\n\
         \x20   li %1, 24\n\
         \x20   aa %2, %1, 4\n\
         \x20   aa %3, %1, 4\n\
         \x20   halt\n\
         .end",
    )
    .unwrap();
    // First allocation at 0; break moves to 24, rounded up to 32 for the
    // second 16-byte-aligned allocation.
    assert_eq!(local(&proc, 2), Value::Unsigned(0));
    assert_eq!(local(&proc, 3), Value::Unsigned(32));
    assert!(proc.pointer_is_live(0));
    assert!(proc.pointer_is_live(32));
}

#[test]
fn indirect_access_stores_and_loads_through_pointer() {
    let proc = run(
        ".function: [[entry_point]] main\n\
         \x20   li %1, 8\n\
         \x20   aa %2, %1, 3\n\
         \x20   addiu *2.l, void, 99\n\
         \x20   add %3, *2.l, void\n\
         \x20   halt\n\
         .end",
    )
    .unwrap();
    assert_eq!(local(&proc, 3), Value::Unsigned(99));
}

#[test]
fn indirect_access_without_allocation_traps() {
    let err = run(
        ".function: [[entry_point]] main\n\
         \x20   li %2, 64\n\
         \x20   addiu *2.l, void, 99\n\
         \x20   halt\n\
         .end",
    )
    .unwrap_err();
    assert!(matches!(err, Trap::InvalidPointer { address: 64, .. }));
}

#[test]
fn arithmetic_on_boxed_value_traps() {
    let err = run(
        ".function: [[entry_point]] main\n\
         \x20   string %1, \"nan\"\n\
         \x20   add %2, %1, %1\n\
         \x20   halt\n\
         .end",
    )
    .unwrap_err();
    assert!(matches!(err, Trap::InvalidOperandType { .. }));
}

#[test]
fn preemption_after_exactly_threshold_instructions() {
    let mut proc = start(
        ".function: [[entry_point]] main\n\
         \x20   noop\n\
         \x20   noop\n\
         \x20   noop\n\
         \x20   halt\n\
         .end",
    );
    let entry = proc.ip;
    let scheduler = Scheduler::new();

    let outcome = scheduler.run_quantum(&mut proc).unwrap();
    assert_eq!(outcome, QuantumOutcome::Preempted { executed: 2 });
    assert_eq!(proc.ip, entry + 2);
}

#[test]
fn greedy_bundle_overruns_quantum_atomically() {
    // The full-width li expands to a seven-word greedy bundle; the first
    // quantum must run it whole before preempting.
    let mut proc = start(
        ".function: [[entry_point]] main\n\
         \x20   li %1, 0xdeadbeefdeadbeef\n\
         \x20   noop\n\
         \x20   halt\n\
         .end",
    );
    let scheduler = Scheduler::new();

    let outcome = scheduler.run_quantum(&mut proc).unwrap();
    assert_eq!(outcome, QuantumOutcome::Preempted { executed: 7 });
    assert_eq!(local(&proc, 1), Value::Unsigned(0xdead_beef_dead_beef));
}

#[test]
fn configurable_threshold_changes_quantum() {
    let mut proc = start(
        ".function: [[entry_point]] main\n\
         \x20   noop\n\
         \x20   noop\n\
         \x20   noop\n\
         \x20   noop\n\
         \x20   halt\n\
         .end",
    );
    let scheduler = Scheduler::with_threshold(3);
    let outcome = scheduler.run_quantum(&mut proc).unwrap();
    assert_eq!(outcome, QuantumOutcome::Preempted { executed: 3 });
}

#[test]
fn float_immediate_loads_bit_pattern() {
    let proc = run(
        ".function: [[entry_point]] main\n\
         \x20   float %1, 3.14\n\
         \x20   halt\n\
         .end",
    )
    .unwrap();
    assert_eq!(local(&proc, 1), Value::FloatSingle(3.14));
}

#[test]
fn trap_reports_ip_and_opcode() {
    let err = run(
        ".function: [[entry_point]] main\n\
         \x20   li %1, 1\n\
         \x20   li %2, 0\n\
         \x20   div %3, %1, %2\n\
         \x20   halt\n\
         .end",
    )
    .unwrap_err();
    let Trap::DivisionByZero { ip, opcode } = err else {
        panic!("expected a division trap");
    };
    assert_eq!(opcode, Opcode::Div as u16);
    // Two single-word li expansions precede the DIV; the guard word is
    // at index 0 and the entry at 1.
    assert_eq!(ip, 3);
}

#[test]
fn symbol_index_pair_loads_any_u64() {
    let proc = run(
        ".function: [[entry_point]] main\n\
         \x20   lih %1, 0xdeadbeef\n\
         \x20   lil %1, 0xcafebabe\n\
         \x20   halt\n\
         .end",
    )
    .unwrap();
    assert_eq!(local(&proc, 1), Value::Unsigned(0xdead_beef_cafe_babe));
}
