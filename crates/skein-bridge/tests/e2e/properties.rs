//! Bridge behaviour seen from scripts
//!
//! These tests validate:
//! - Failed member writes leave host state untouched
//! - Overload resolution failures surface as catchable script errors
//! - Handles and script functions become unusable once released
//! - Host panics and borrow conflicts do not poison the session

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use skein_bridge::{
    arg, BridgeError, HostFunction, HostObject, HostType, HostValue, ScriptFunction, Session,
    SessionOptions, TypeBuilder,
};
use skein_sdk::{ScriptVm, ValueType};

use super::harness::*;

thread_local! {
    static LIMIT: Cell<i64> = const { Cell::new(10) };
}

#[derive(Default)]
struct Gauge {
    level: i64,
    label: String,
}

fn gauge() -> TypeBuilder<Gauge> {
    TypeBuilder::<Gauge>::new("Gauge")
        .default_constructor()
        .readonly_static_property("Limit", || LIMIT.with(Cell::get))
        .field("Level", |g: &Gauge| g.level, |g: &mut Gauge, v: i64| g.level = v)
        .readonly_field("Label", |g: &Gauge| g.label.clone())
        .action("Set", &[HostType::Int], |_cx, g: &mut Gauge, args| {
            g.level = arg(args, 0)?;
            Ok(())
        })
        .action("Set", &[HostType::String], |_cx, g: &mut Gauge, args| {
            g.label = arg(args, 0)?;
            Ok(())
        })
        .action("Pair", &[HostType::Int, HostType::String], |_cx, g: &mut Gauge, args| {
            g.level = arg(args, 0)?;
            g.label = arg::<Option<String>>(args, 1)?.unwrap_or_else(|| "unset".to_string());
            Ok(())
        })
        .reentrant_action("Absorb", &[HostType::Object("Gauge")], |_cx, this, args| {
            let other = arg::<HostObject>(args, 0)?;
            let level = other.borrow::<Gauge>()?.level;
            this.borrow_mut::<Gauge>()?.level += level;
            Ok(())
        })
        .reentrant_method("Poll", &[HostType::Function], |cx, this, args| {
            let sampler = arg::<Rc<ScriptFunction>>(args, 0)?;
            let level = sampler.call_as::<i64>(cx, &[])?;
            sampler.dispose(cx)?;
            this.borrow_mut::<Gauge>()?.level = level;
            Ok(level)
        })
        .writeonly_property("Note", |g: &mut Gauge, v: String| g.label = v)
        .action("Explode", &[], |_cx, _g: &mut Gauge, _args| {
            panic!("gauge exploded");
        })
}

/// Session over `body` with `Gauge` forwarded
fn gauge_session<F>(body: F, capture: &Capture) -> Session
where
    F: Fn(&mut dyn ScriptVm) -> ChunkResult + 'static,
{
    let mut session = session_with("gauge", body, capture.options());
    session.forward_type(gauge()).unwrap();
    session
}

/// Messages recorded by a chunk
type Messages = Rc<RefCell<Vec<Option<String>>>>;

// ============================================================================
// Member access
// ============================================================================

#[test]
fn test_read_only_static_write_fails_and_keeps_value() {
    let messages = Messages::default();
    let recorded = Rc::clone(&messages);
    let capture = Capture::new();
    let mut session = gauge_session(
        move |vm| {
            let error = protected(vm, |vm| set(vm, "Gauge", "Limit", Arg::Num(99.0)));
            recorded.borrow_mut().push(error);
            get(vm, "Gauge", "Limit")?;
            print_top(vm)?;
            Ok(0)
        },
        &capture,
    );
    session.run("gauge", "gauge").unwrap();

    assert_eq!(
        *messages.borrow(),
        vec![Some("Member 'Limit' is read-only".to_string())]
    );
    assert_eq!(capture.lines(), vec!["10"]);
}

#[test]
fn test_callable_static_members_are_read_only() {
    let messages = Messages::default();
    let recorded = Rc::clone(&messages);
    let capture = Capture::new();
    let mut session = session_with(
        "gauge",
        move |vm| {
            for name in ["new", "Calibrate"] {
                let error = protected(vm, move |vm| set(vm, "Gauge", name, Arg::Num(1.0)));
                recorded.borrow_mut().push(error);
            }
            call_field(vm, "Gauge", "new", &[])?;
            local(vm, "g");
            get(vm, "g", "Level")?;
            print_top(vm)?;
            call_field(vm, "Gauge", "Calibrate", &[])?;
            print_top(vm)?;
            Ok(0)
        },
        capture.options(),
    );
    session
        .forward_type(gauge().static_method("Calibrate", &[], |_cx, _args| Ok(7_i64)))
        .unwrap();
    session.run("gauge", "gauge").unwrap();

    assert_eq!(
        *messages.borrow(),
        vec![
            Some("Member 'new' is read-only".to_string()),
            Some("Member 'Calibrate' is read-only".to_string()),
        ]
    );
    assert_eq!(capture.lines(), vec!["0", "7"]);
}

#[test]
fn test_unknown_member_write_is_ignored() {
    let capture = Capture::new();
    let mut session = gauge_session(
        |vm| {
            call_field(vm, "Gauge", "new", &[])?;
            local(vm, "g");
            set(vm, "g", "Missing", Arg::Num(1.0))?;
            set(vm, "Gauge", "Missing", Arg::Num(1.0))?;
            get(vm, "Gauge", "Missing")?;
            print_top(vm)?;
            Ok(0)
        },
        &capture,
    );
    session.run("gauge", "gauge").unwrap();
    assert_eq!(capture.lines(), vec!["nil"]);
    assert!(capture.errors().is_empty());
}

#[test]
fn test_instance_field_write_converts_and_rejects() {
    let messages = Messages::default();
    let recorded = Rc::clone(&messages);
    let capture = Capture::new();
    let mut session = gauge_session(
        move |vm| {
            call_field(vm, "Gauge", "new", &[])?;
            local(vm, "g");
            set(vm, "g", "Level", Arg::Str(" 12 "))?;
            recorded
                .borrow_mut()
                .push(protected(vm, |vm| set(vm, "g", "Level", Arg::Bool(true))));
            recorded
                .borrow_mut()
                .push(protected(vm, |vm| set(vm, "g", "Label", Arg::Str("x"))));
            get(vm, "g", "Level")?;
            print_top(vm)?;
            Ok(0)
        },
        &capture,
    );
    session.run("gauge", "gauge").unwrap();

    assert_eq!(
        *messages.borrow(),
        vec![
            Some("Type mismatch: expected int, got bool".to_string()),
            Some("Member 'Label' is read-only".to_string()),
        ]
    );
    assert_eq!(capture.lines(), vec!["12"]);
}

#[test]
fn test_method_reference_without_receiver() {
    let capture = Capture::new();
    let mut session = gauge_session(
        |vm| {
            call_field(vm, "Gauge", "new", &[])?;
            local(vm, "g");
            // g.Set(4) with dot syntax
            call_field(vm, "g", "Set", &[Arg::Num(4.0)])?;
            vm.pop(1);
            get(vm, "g", "Level")?;
            print_top(vm)?;
            Ok(0)
        },
        &capture,
    );
    session.run("gauge", "gauge").unwrap();
    assert_eq!(capture.lines(), vec!["4"]);
}

// ============================================================================
// Overload resolution
// ============================================================================

#[test]
fn test_overloads_pick_by_argument_type() {
    let capture = Capture::new();
    let mut session = gauge_session(
        |vm| {
            call_field(vm, "Gauge", "new", &[])?;
            local(vm, "g");
            invoke(vm, "g", "Set", &[Arg::Num(3.0)])?;
            invoke(vm, "g", "Set", &[Arg::Str("three")])?;
            vm.pop(2);
            get(vm, "g", "Level")?;
            print_top(vm)?;
            get(vm, "g", "Label")?;
            print_top(vm)?;
            Ok(0)
        },
        &capture,
    );
    session.run("gauge", "gauge").unwrap();
    assert_eq!(capture.lines(), vec!["3", "three"]);
}

#[test]
fn test_no_matching_overload_is_catchable() {
    let messages = Messages::default();
    let recorded = Rc::clone(&messages);
    let capture = Capture::new();
    let mut session = gauge_session(
        move |vm| {
            call_field(vm, "Gauge", "new", &[])?;
            local(vm, "g");
            let error = protected(vm, |vm| invoke(vm, "g", "Set", &[Arg::Bool(true)]));
            recorded.borrow_mut().push(error);
            let error = protected(vm, |vm| invoke(vm, "g", "Nope", &[]));
            recorded.borrow_mut().push(error);
            print(vm, &[Arg::Str("still running")])?;
            Ok(0)
        },
        &capture,
    );
    session.run("gauge", "gauge").unwrap();

    assert_eq!(
        *messages.borrow(),
        vec![
            Some("No matching overload for 'Set' with 1 argument(s)".to_string()),
            Some("No matching overload for 'Nope' with 0 argument(s)".to_string()),
        ]
    );
    assert_eq!(capture.lines(), vec!["still running"]);
}

#[test]
fn test_trailing_nil_is_dropped() {
    let capture = Capture::new();
    let mut session = gauge_session(
        |vm| {
            call_field(vm, "Gauge", "new", &[Arg::Nil])?;
            local(vm, "g");
            invoke(vm, "g", "Set", &[Arg::Num(8.0), Arg::Nil])?;
            vm.pop(1);
            invoke(vm, "g", "Pair", &[Arg::Num(2.0), Arg::Nil])?;
            vm.pop(1);
            get(vm, "g", "Label")?;
            print_top(vm)?;
            get(vm, "g", "Level")?;
            print_top(vm)?;
            Ok(0)
        },
        &capture,
    );
    session.run("gauge", "gauge").unwrap();
    // Pair(2, nil) matches exactly, so the nil reaches the host
    assert_eq!(capture.lines(), vec!["unset", "2"]);
}

#[test]
fn test_constructor_arity_mismatch() {
    let messages = Messages::default();
    let recorded = Rc::clone(&messages);
    let mut session = gauge_session(
        move |vm| {
            let error = protected(vm, |vm| {
                call_field(vm, "Gauge", "new", &[Arg::Num(1.0), Arg::Num(2.0)])
            });
            recorded.borrow_mut().push(error);
            Ok(0)
        },
        &Capture::new(),
    );
    session.run("gauge", "gauge").unwrap();
    assert_eq!(
        *messages.borrow(),
        vec![Some(
            "No constructor of 'Gauge' takes 2 argument(s)".to_string()
        )]
    );
}

// ============================================================================
// Dictionaries
// ============================================================================

#[test]
fn test_dictionary_entries_take_precedence() {
    type Settings = BTreeMap<String, String>;

    let capture = Capture::new();
    let mut session = session_with(
        "settings",
        |vm| {
            get(vm, "settings", "len")?;
            print_top(vm)?;
            set(vm, "settings", "len", Arg::Num(3.0))?;
            get(vm, "settings", "len")?;
            print_top(vm)?;
            get(vm, "settings", "mode")?;
            print_top(vm)?;
            Ok(0)
        },
        capture.options(),
    );
    session
        .register_type(
            TypeBuilder::<Settings>::new("Settings")
                .readonly_field("len", |s: &Settings| s.len() as i64)
                .dictionary(),
        )
        .unwrap();
    let settings = session
        .push_object("settings", Settings::from([("mode".to_string(), "fast".to_string())]))
        .unwrap();
    session.run("settings", "settings").unwrap();

    assert_eq!(capture.lines(), vec!["nil", "3", "fast"]);
    assert_eq!(settings.borrow::<Settings>().unwrap()["len"], "3");
}

#[test]
fn test_dictionary_callable_entry_is_callable_from_script() {
    type Toolbox = HashMap<String, HostValue>;

    let capture = Capture::new();
    let mut session = session_with(
        "tools",
        |vm| {
            call_field(vm, "tools", "greet", &[Arg::Str("bridge")])?;
            print_top(vm)?;
            get(vm, "tools", "count")?;
            print_top(vm)?;
            Ok(0)
        },
        capture.options(),
    );
    session
        .register_type(TypeBuilder::<Toolbox>::new("Toolbox").dictionary())
        .unwrap();
    let greet = HostFunction::new("greet", |_cx, args| {
        Ok(format!("hello {}", arg::<String>(args, 0)?))
    });
    let toolbox = Toolbox::from([
        ("greet".to_string(), HostValue::Callable(greet)),
        ("count".to_string(), HostValue::Int(3)),
    ]);
    session.push_object("tools", toolbox).unwrap();
    session.run("tools", "tools").unwrap();

    assert_eq!(capture.lines(), vec!["hello bridge", "3"]);
}

// ============================================================================
// Lifetimes
// ============================================================================

#[test]
fn test_token_unresolved_after_teardown() {
    let mut session = gauge_session(|_vm| Ok(0), &Capture::new());
    let object = session.push_object("g", Gauge::default()).unwrap();
    let token = session.surface::<Gauge>().unwrap().token().unwrap();

    session.teardown();
    assert!(matches!(
        session.resolve(token),
        Err(BridgeError::UnresolvedHandle { .. })
    ));
    // The host keeps its own reference
    assert_eq!(object.borrow::<Gauge>().unwrap().level, 0);
}

#[test]
fn test_disposed_function_cannot_be_called() {
    let kept: Rc<RefCell<Option<Rc<ScriptFunction>>>> = Rc::default();
    let stash = Rc::clone(&kept);
    let capture = Capture::new();
    let mut session = session_with(
        "keep",
        |vm| {
            let callback = native(|vm| {
                vm.push_number(42.0);
                Ok(1)
            });
            call_global(vm, "keep", &[Arg::Func(callback)])?;
            vm.pop(1);
            Ok(0)
        },
        capture.options(),
    );
    session
        .push_function(
            "keep",
            HostFunction::action("keep", move |_cx, args| {
                *stash.borrow_mut() = Some(arg(args, 0)?);
                Ok(())
            }),
        )
        .unwrap();
    session.run("keep", "keep").unwrap();
    assert_eq!(session.live_script_functions(), 1);

    let func = kept.borrow_mut().take().unwrap();
    let mut cx = session.context();
    assert_eq!(func.call_as::<i64>(&mut cx, &[]).unwrap(), 42);
    func.dispose(&mut cx).unwrap();
    assert!(func.is_disposed());
    assert_eq!(func.call(&mut cx, &[]).unwrap_err(), BridgeError::DisposedFunction);
    assert_eq!(func.dispose(&mut cx).unwrap_err(), BridgeError::DisposedFunction);
    drop(cx);
    assert_eq!(session.live_script_functions(), 0);
}

#[test]
fn test_handle_limit_is_a_script_error() {
    let messages = Messages::default();
    let recorded = Rc::clone(&messages);
    let capture = Capture::new();
    let options = SessionOptions {
        max_handles: Some(2),
        ..capture.options()
    };
    let mut session = session_with(
        "limit",
        move |vm| {
            // The surface holds one handle, each object another
            call_field(vm, "Gauge", "new", &[])?;
            local(vm, "first");
            let error = protected(vm, |vm| call_field(vm, "Gauge", "new", &[]));
            recorded.borrow_mut().push(error);
            Ok(0)
        },
        options,
    );
    session.forward_type(gauge()).unwrap();
    session.run("limit", "limit").unwrap();

    assert_eq!(
        *messages.borrow(),
        vec![Some("Handle limit of 2 reached".to_string())]
    );
    assert_eq!(session.handles_live(), 2);
}

// ============================================================================
// Failure isolation
// ============================================================================

#[test]
fn test_same_object_returned_repeatedly_keeps_one_handle() {
    let capture = Capture::new();
    let mut session = gauge_session(
        |vm| {
            for _ in 0..5 {
                call_global(vm, "current", &[])?;
                vm.pop(1);
            }
            call_global(vm, "current", &[])?;
            local(vm, "g");
            get(vm, "g", "Level")?;
            print_top(vm)?;
            Ok(0)
        },
        &capture,
    );
    let held = session
        .push_object("held", Gauge { level: 8, ..Gauge::default() })
        .unwrap();
    session
        .push_function("current", HostFunction::new("current", move |_cx, _args| Ok(held.clone())))
        .unwrap();
    session.run("gauge", "gauge").unwrap();

    assert_eq!(capture.lines(), vec!["8"]);
    // Surface plus the one object
    assert_eq!(session.handles_live(), 2);
}

#[test]
fn test_host_panic_becomes_script_error() {
    let messages = Messages::default();
    let recorded = Rc::clone(&messages);
    let capture = Capture::new();
    let mut session = gauge_session(
        move |vm| {
            call_field(vm, "Gauge", "new", &[])?;
            local(vm, "g");
            let error = protected(vm, |vm| invoke(vm, "g", "Explode", &[]));
            recorded.borrow_mut().push(error);
            invoke(vm, "g", "Set", &[Arg::Num(6.0)])?;
            vm.pop(1);
            get(vm, "g", "Level")?;
            print_top(vm)?;
            Ok(0)
        },
        &capture,
    );
    session.run("gauge", "gauge").unwrap();

    assert_eq!(
        *messages.borrow(),
        vec![Some("Host function panicked: gauge exploded".to_string())]
    );
    assert_eq!(capture.lines(), vec!["6"]);
}

#[test]
fn test_receiver_passed_as_its_own_argument() {
    let messages = Messages::default();
    let recorded = Rc::clone(&messages);
    let capture = Capture::new();
    let mut session = gauge_session(
        move |vm| {
            call_field(vm, "Gauge", "new", &[])?;
            local(vm, "a");
            call_field(vm, "Gauge", "new", &[])?;
            local(vm, "b");
            invoke(vm, "b", "Set", &[Arg::Num(5.0)])?;
            invoke(vm, "a", "Absorb", &[Arg::Global("b")])?;
            vm.pop(2);
            let error = protected(vm, |vm| invoke(vm, "a", "Absorb", &[Arg::Global("a")]));
            recorded.borrow_mut().push(error);
            get(vm, "a", "Level")?;
            print_top(vm)?;
            Ok(0)
        },
        &capture,
    );
    session.run("gauge", "gauge").unwrap();

    assert_eq!(*messages.borrow(), vec![None]);
    assert_eq!(capture.lines(), vec!["10"]);
}

#[test]
fn test_callback_reads_receiver_during_method() {
    let messages = Messages::default();
    let recorded = Rc::clone(&messages);
    let capture = Capture::new();
    let mut session = gauge_session(
        move |vm| {
            call_field(vm, "Gauge", "new", &[])?;
            local(vm, "g");
            set(vm, "g", "Level", Arg::Num(4.0))?;
            // g:Poll(function() return g.Level + 1 end)
            let next = native(|vm| {
                get(vm, "g", "Level")?;
                let level = vm.to_number(-1).unwrap_or(0.0);
                vm.pop(1);
                vm.push_number(level + 1.0);
                Ok(1)
            });
            let error = protected(vm, move |vm| {
                invoke(vm, "g", "Poll", &[Arg::Func(Rc::clone(&next))])?;
                print_top(vm)
            });
            recorded.borrow_mut().push(error);
            get(vm, "g", "Level")?;
            print_top(vm)?;
            Ok(0)
        },
        &capture,
    );
    session.run("gauge", "gauge").unwrap();

    assert_eq!(*messages.borrow(), vec![None]);
    assert_eq!(capture.lines(), vec!["5", "5"]);
    assert_eq!(session.live_script_functions(), 0);
}

#[test]
fn test_mutable_method_keeps_receiver_borrowed() {
    let messages = Messages::default();
    let recorded = Rc::clone(&messages);
    let capture = Capture::new();
    let mut session = session_with(
        "gauge",
        move |vm| {
            call_field(vm, "Gauge", "new", &[])?;
            local(vm, "g");
            let reader = native(|vm| {
                get(vm, "g", "Level")?;
                Ok(1)
            });
            let error = protected(vm, move |vm| {
                invoke(vm, "g", "Hold", &[Arg::Func(Rc::clone(&reader))])
            });
            recorded.borrow_mut().push(error);
            Ok(0)
        },
        capture.options(),
    );
    session
        .forward_type(gauge().action("Hold", &[HostType::Function], |cx, _g: &mut Gauge, args| {
            let reader = arg::<Rc<ScriptFunction>>(args, 0)?;
            reader.call(cx, &[])?;
            reader.dispose(cx)
        }))
        .unwrap();
    session.run("gauge", "gauge").unwrap();

    let messages = messages.borrow();
    let message = messages[0].as_deref().unwrap();
    assert!(message.contains("Host object of type 'Gauge' is already in use"), "{message}");
}

#[test]
fn test_writeonly_property_reads_as_callable() {
    let kinds: Rc<RefCell<Vec<ValueType>>> = Rc::default();
    let seen = Rc::clone(&kinds);
    let capture = Capture::new();
    let mut session = gauge_session(
        move |vm| {
            call_field(vm, "Gauge", "new", &[])?;
            local(vm, "g");
            set(vm, "g", "Note", Arg::Str("calibrated"))?;
            get(vm, "g", "Label")?;
            print_top(vm)?;
            get(vm, "g", "Note")?;
            seen.borrow_mut().push(vm.type_of(-1));
            vm.pop(1);
            Ok(0)
        },
        &capture,
    );
    session.run("gauge", "gauge").unwrap();

    assert_eq!(capture.lines(), vec!["calibrated"]);
    assert_eq!(*kinds.borrow(), vec![ValueType::Function]);
}

#[test]
fn test_uncaught_script_error_reaches_error_sink() {
    let capture = Capture::new();
    let mut session = gauge_session(
        |vm| {
            call_field(vm, "Gauge", "new", &[Arg::Str("a"), Arg::Str("b")])?;
            Ok(0)
        },
        &capture,
    );
    let err = session.run("gauge", "gauge").unwrap_err();

    assert!(matches!(err, BridgeError::Vm(_)));
    assert_eq!(
        capture.errors(),
        vec!["Runtime error: No constructor of 'Gauge' takes 2 argument(s)".to_string()]
    );
    // The session survives and can run the chunk again
    assert!(session.run("gauge", "gauge").is_err());
    assert_eq!(capture.errors().len(), 2);
}

#[test]
fn test_host_reads_script_values() {
    let capture = Capture::new();
    let mut session = gauge_session(
        |vm| {
            call_field(vm, "Gauge", "new", &[])?;
            local(vm, "g");
            invoke(vm, "g", "Set", &[Arg::Num(2.5)])?;
            vm.pop(1);
            Ok(0)
        },
        &capture,
    );
    session.run("gauge", "gauge").unwrap();

    let g = session.get_global("g").unwrap();
    // 2.5 rounds half to even
    assert_eq!(g.as_object().unwrap().borrow::<Gauge>().unwrap().level, 2);
    assert_eq!(session.get_global("nothing").unwrap(), HostValue::Nil);
}
