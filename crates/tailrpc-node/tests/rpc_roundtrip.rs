mod support;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tailrpc_core::{ControlFn, CorrelationId, Value};
use tailrpc_node::{
    arg, EngineConfig, EngineError, EngineEvent, HandlerError, Outgoing, Reply, Responder, RpcEngine,
};

use support::{count_matching, errors, record_events, shared, warnings, Network};

#[test]
fn echo_call_gets_exactly_one_reply() {
    let net = Network::new();
    let mut a = net.engine("A");
    let mut b = net.engine("B");
    b.expose("echo", |_, args| Ok(args.first().cloned().unwrap_or(Value::Null)))
        .expect("valid name");
    a.start();
    b.start();

    let replies = shared(Vec::new());
    let r = Arc::clone(&replies);
    let id = a
        .send(
            Outgoing::new("echo")
                .arg("hi")
                .to("B")
                .on_reply(move |ctx, reply| {
                    r.lock()
                        .expect("lock")
                        .push((ctx.replier().to_string(), reply));
                    Ok(())
                }),
        )
        .expect("valid send")
        .expect("handler registered");

    assert_eq!(b.poll().dispatched, 2);
    a.poll();

    assert_eq!(
        *replies.lock().expect("lock"),
        vec![("B".to_string(), Reply::Success(vec![json!("hi")]))]
    );
    assert_eq!(net.sent("#cb"), 1);
    assert_eq!(a.callback(id).expect("entry kept until sweep").invocation_count, 1);
}

#[test]
fn handler_arguments_decode_and_result_is_returned() {
    let net = Network::new();
    let mut a = net.engine("A");
    let mut b = net.engine("B");
    b.expose("sum", |_, args| {
        let x: i64 = arg(args, 0)?;
        let y: i64 = arg(args, 1)?;
        Ok(json!(x + y))
    })
    .expect("valid name");
    a.start();
    b.start();

    let results = shared(Vec::new());
    let r = Arc::clone(&results);
    a.send(
        Outgoing::new("sum")
            .payload(json!([2, 3]))
            .to("B")
            .on_reply(move |_, reply| {
                r.lock().expect("lock").push(reply.into_result());
                Ok(())
            }),
    )
    .expect("valid send");
    a.send(
        Outgoing::new("sum")
            .payload(json!(["two", 3]))
            .to("B")
            .on_reply({
                let r = Arc::clone(&results);
                move |_, reply| {
                    r.lock().expect("lock").push(reply.into_result());
                    Ok(())
                }
            }),
    )
    .expect("valid send");

    b.poll();
    a.poll();

    let results = results.lock().expect("lock");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0], Ok(vec![json!(5)]));
    let detail = results[1].clone().expect_err("bad argument fails");
    assert!(detail[0].as_str().expect("string detail").contains("argument 0"));
}

#[test]
fn unexposed_function_replies_once_and_reaches_sender_handler() {
    let net = Network::new();
    let mut a = net.engine("A");
    let mut b = net.engine("B");
    let a_events = record_events(&mut a);
    let b_events = record_events(&mut b);
    a.start();
    b.start();

    let replies = shared(Vec::new());
    let r = Arc::clone(&replies);
    let id = a
        .send(Outgoing::new("missing").to("B").on_reply(move |_, reply| {
            r.lock().expect("lock").push(reply);
            Ok(())
        }))
        .expect("valid send")
        .expect("handler registered");

    b.poll();
    assert_eq!(net.sent("#fn_not_exposed"), 1);
    assert_eq!(count_matching(&warnings(&b_events), "function not exposed: missing"), 1);

    a.poll();
    let replies = replies.lock().expect("lock");
    assert_eq!(replies.len(), 1);
    match &replies[0] {
        Reply::NotExposed(args) => assert_eq!(args, &vec![json!("missing is not exposed on B")]),
        other => panic!("expected a not-exposed reply, got {other:?}"),
    }
    assert_eq!(count_matching(&warnings(&a_events), "function not exposed on B"), 1);
    assert_eq!(a.callback(id).expect("entry").invocation_count, 1);
}

#[test]
fn unexposed_call_without_handler_only_warns() {
    let net = Network::new();
    let mut a = net.engine("A");
    let mut b = net.engine("B");
    let b_events = record_events(&mut b);
    a.start();
    b.start();

    a.send(Outgoing::new("missing").to("B")).expect("valid send");
    b.poll();

    assert_eq!(net.sent("#fn_not_exposed"), 0);
    assert_eq!(count_matching(&warnings(&b_events), "function not exposed"), 1);
}

#[test]
fn ping_reports_latency_and_responder() {
    let net = Network::new();
    let mut a = net.engine("A");
    let mut b = net.engine("B");
    let b_events = record_events(&mut b);
    a.start();
    b.start();

    let pings = shared(Vec::new());
    let p = Arc::clone(&pings);
    a.ping_with("B", move |latency, who| {
        p.lock().expect("lock").push((latency, who.to_string()))
    })
    .expect("valid ping");

    b.poll();
    net.clock.advance(Duration::from_millis(25));
    a.poll();

    assert_eq!(
        *pings.lock().expect("lock"),
        vec![(Duration::from_millis(25), "B".to_string())]
    );
    assert!(b_events
        .lock()
        .expect("lock")
        .contains(&EngineEvent::Pinged("A".to_string())));
}

#[test]
fn ping_without_latency_handler_still_resolves() {
    let net = Network::new();
    let mut a = net.engine("A");
    let mut b = net.engine("B");
    a.start();
    b.start();

    let id = a.ping("*").expect("valid ping").expect("handler registered");
    b.poll();
    a.poll();

    assert_eq!(a.callback(id).expect("entry").invocation_count, 1);
}

#[test]
fn list_replies_with_exposed_names() {
    let net = Network::new();
    let mut a = net.engine("A");
    let mut b = net.engine("B");
    b.expose("sum", |_, _| Ok(json!(0))).expect("valid name");
    b.expose("echo", |_, _| Ok(json!(0))).expect("valid name");
    a.start();
    b.start();

    let names = shared(Vec::new());
    let n = Arc::clone(&names);
    a.send(Outgoing::new("#list").to("B").on_reply(move |_, reply| {
        n.lock().expect("lock").push(reply);
        Ok(())
    }))
    .expect("valid send");
    b.poll();
    a.poll();

    assert_eq!(
        *names.lock().expect("lock"),
        vec![Reply::Success(vec![json!(["echo", "sum"])])]
    );
}

#[test]
fn expired_message_is_never_dispatched_and_warns_once() {
    let net = Network::new();
    let mut a = net.engine("A");
    let mut b = net.engine("B");
    let b_events = record_events(&mut b);
    let calls = shared(0_u32);
    let c = Arc::clone(&calls);
    b.expose("echo", move |_, _| {
        *c.lock().expect("lock") += 1;
        Ok(Value::Null)
    })
    .expect("valid name");
    a.start();
    b.start();

    a.send(
        Outgoing::new("echo")
            .to("B")
            .ttl(Duration::from_millis(100))
            .on_reply(|_, _| Ok(())),
    )
    .expect("valid send");
    net.clock.advance(Duration::from_millis(200));

    let report = b.poll();
    assert_eq!(report.expired, 1);
    b.poll();

    assert_eq!(*calls.lock().expect("lock"), 0);
    assert_eq!(count_matching(&warnings(&b_events), "ignored as it is too old"), 1);
    assert_eq!(net.sent("#cb"), 0);
}

#[test]
fn ttl_extension_only_advances_and_deferred_reply_arrives_late() {
    let net = Network::new();
    let mut a = net.engine("A");
    let mut b = net.engine("B");
    let a_events = record_events(&mut a);
    let parked: Arc<std::sync::Mutex<Option<Responder>>> = shared(None);
    let slot = Arc::clone(&parked);
    b.expose("slow", move |ctx, _| {
        let responder = ctx.defer();
        responder.extend_ttl(Duration::from_secs(10));
        *slot.lock().expect("lock") = Some(responder);
        Ok(Value::Null)
    })
    .expect("valid name");
    a.start();
    b.start();

    let replies = shared(Vec::new());
    let r = Arc::clone(&replies);
    let id = a
        .send(Outgoing::new("slow").to("B").on_reply(move |_, reply| {
            r.lock().expect("lock").push(reply);
            Ok(())
        }))
        .expect("valid send")
        .expect("handler registered");
    let original_ttl = a.callback(id).expect("entry").ttl;

    b.poll();
    a.poll();
    let extensions = |events: &support::Events| {
        events
            .lock()
            .expect("lock")
            .iter()
            .filter(|e| matches!(e, EngineEvent::Extension { .. }))
            .count()
    };
    assert_eq!(extensions(&a_events), 1);
    let extended = a.callback(id).expect("entry").ttl;
    assert_eq!(extended, original_ttl.saturating_add(Duration::from_secs(10)));
    assert_eq!(net.sent("#cb"), 0);

    for proposed in [original_ttl.as_millis(), extended.as_millis()] {
        b.send(
            Outgoing::reply_control(ControlFn::CbTtlExtend, id)
                .arg(proposed)
                .to("A"),
        )
        .expect("valid send");
    }
    a.poll();
    assert_eq!(extensions(&a_events), 1);
    assert_eq!(a.callback(id).expect("entry").ttl, extended);

    net.clock.advance(Duration::from_secs(5));
    parked
        .lock()
        .expect("lock")
        .as_ref()
        .expect("responder parked")
        .reply(vec![json!("late")]);
    a.poll();
    assert_eq!(
        *replies.lock().expect("lock"),
        vec![Reply::Success(vec![json!("late")])]
    );
}

#[test]
fn unanswered_callback_is_swept_with_one_warning() {
    let net = Network::new();
    let mut a = net.engine("A");
    let a_events = record_events(&mut a);
    a.start();

    let id = a
        .send(Outgoing::new("echo").to("Nobody").on_reply(|_, _| Ok(())))
        .expect("valid send")
        .expect("handler registered");
    assert_eq!(a.pending_callbacks(), 1);

    net.clock.advance(Duration::from_secs(9));
    assert_eq!(a.poll().sweeps, 0);

    net.clock.advance(Duration::from_secs(1));
    let report = a.poll();
    assert_eq!(report.sweeps, 1);
    assert_eq!(report.swept, 1);
    assert!(a.callback(id).is_none());
    assert_eq!(count_matching(&warnings(&a_events), "unhandled callback for echo to Nobody"), 1);
}

#[test]
fn answered_callback_is_swept_silently() {
    let net = Network::new();
    let mut a = net.engine("A");
    let mut b = net.engine("B");
    let a_events = record_events(&mut a);
    b.expose("echo", |_, _| Ok(Value::Null)).expect("valid name");
    a.start();
    b.start();

    a.send(Outgoing::new("echo").to("B").on_reply(|_, _| Ok(())))
        .expect("valid send");
    b.poll();
    a.poll();

    net.clock.advance(Duration::from_secs(10));
    assert_eq!(a.sweep_now(), 1);
    assert_eq!(count_matching(&warnings(&a_events), "unhandled callback"), 0);
}

#[test]
fn handler_failures_become_error_replies() {
    let net = Network::new();
    let mut a = net.engine("A");
    let mut b = net.engine("B");
    let b_events = record_events(&mut b);
    b.expose("boom", |_, _| Err(HandlerError::failed("kaput")))
        .expect("valid name");
    b.expose("panics", |_, _| panic!("handler exploded"))
        .expect("valid name");
    a.start();
    b.start();

    let replies = shared(Vec::new());
    for function in ["boom", "panics"] {
        let r = Arc::clone(&replies);
        a.send(Outgoing::new(function).to("B").on_reply(move |_, reply| {
            r.lock().expect("lock").push(reply);
            Ok(())
        }))
        .expect("valid send");
    }
    a.send(Outgoing::new("boom").to("B")).expect("valid send");

    b.poll();
    a.poll();

    assert_eq!(errors(&b_events).len(), 3);
    assert_eq!(net.sent("#cb_error"), 2);
    let replies = replies.lock().expect("lock");
    assert_eq!(replies[0], Reply::Failure(vec![json!("kaput")]));
    match &replies[1] {
        Reply::Failure(args) => {
            assert!(args[0].as_str().expect("detail").contains("handler exploded"))
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[test]
fn explicit_reply_and_fail_suppress_automatic_reply() {
    let net = Network::new();
    let mut a = net.engine("A");
    let mut b = net.engine("B");
    let b_events = record_events(&mut b);
    b.expose("early", |ctx, _| {
        ctx.reply(vec![json!("first")]);
        Ok(json!("ignored"))
    })
    .expect("valid name");
    b.expose("refuse", |ctx, _| {
        ctx.fail("not today");
        Ok(json!("ignored"))
    })
    .expect("valid name");
    a.start();
    b.start();

    let replies = shared(Vec::new());
    for function in ["early", "refuse"] {
        let r = Arc::clone(&replies);
        a.send(Outgoing::new(function).to("B").on_reply(move |_, reply| {
            r.lock().expect("lock").push(reply);
            Ok(())
        }))
        .expect("valid send");
    }
    b.poll();
    a.poll();

    assert_eq!(
        *replies.lock().expect("lock"),
        vec![
            Reply::Success(vec![json!("first")]),
            Reply::Failure(vec![json!("not today")]),
        ]
    );
    assert_eq!(count_matching(&errors(&b_events), "not today"), 1);
}

#[test]
fn reply_handler_fault_is_reported_and_processing_continues() {
    let net = Network::new();
    let mut a = net.engine("A");
    let mut b = net.engine("B");
    let a_events = record_events(&mut a);
    b.expose("echo", |_, args| Ok(args.first().cloned().unwrap_or(Value::Null)))
        .expect("valid name");
    a.start();
    b.start();

    let ok = shared(0_u32);
    a.send(
        Outgoing::new("echo")
            .to("B")
            .on_reply(|_, _| Err(HandlerError::failed("cannot use reply"))),
    )
    .expect("valid send");
    let o = Arc::clone(&ok);
    a.send(Outgoing::new("echo").to("B").on_reply(move |_, _| {
        *o.lock().expect("lock") += 1;
        Ok(())
    }))
    .expect("valid send");

    b.poll();
    a.poll();

    let errors = errors(&a_events);
    assert_eq!(count_matching(&errors, "callback exception: cannot use reply on A calling echo on B reply from B"), 1);
    assert_eq!(*ok.lock().expect("lock"), 1);
}

#[test]
fn unknown_control_and_unknown_callback_warn() {
    let net = Network::new();
    let mut a = net.engine("A");
    let mut b = net.engine("B");
    let b_events = record_events(&mut b);
    a.start();
    b.start();

    a.send(Outgoing::new("#bogus").to("B")).expect("valid send");
    a.send(Outgoing::reply_control(ControlFn::Cb, CorrelationId::generate()).to("B"))
        .expect("valid send");
    b.poll();

    let warnings = warnings(&b_events);
    assert_eq!(count_matching(&warnings, "unhandled reserved function #bogus"), 1);
    assert_eq!(count_matching(&warnings, "callback not found"), 1);
}

#[test]
fn recipients_and_hierarchical_wildcards_route_messages() {
    let net = Network::new();
    let mut a = net.engine("A");
    let mut deep = net.engine("X.Y.Z");
    let mut c = net.engine("C");
    let mut d = net.engine("D");
    let hits = shared(Vec::new());
    for engine in [&mut deep, &mut c, &mut d] {
        let h = Arc::clone(&hits);
        let name = engine.name().to_string();
        engine
            .expose("note", move |_, _| {
                h.lock().expect("lock").push(name.clone());
                Ok(Value::Null)
            })
            .expect("valid name");
        engine.start();
    }
    a.start();

    a.send(Outgoing::new("note").to("X.*, C")).expect("valid send");
    a.send(Outgoing::new("note").to("X.Y.*")).expect("valid send");
    a.send(Outgoing::new("note").to("D*")).expect("valid send");
    for engine in [&mut deep, &mut c, &mut d] {
        engine.poll();
    }

    let mut hits = hits.lock().expect("lock").clone();
    hits.sort();
    assert_eq!(hits, vec!["C", "D", "X.Y.Z", "X.Y.Z"]);
}

#[test]
fn usage_errors_fail_synchronously() {
    let net = Network::new();
    let mut a = net.engine("A");
    let id = CorrelationId::generate();

    let cases = vec![
        Outgoing::new(""),
        Outgoing::new("#cb"),
        Outgoing::new("echo").correlation(id),
        Outgoing::reply_control(ControlFn::Cb, id).on_reply(|_, _| Ok(())),
        Outgoing::new("echo").to(" , "),
    ];
    for message in cases {
        let err = a.send(message).expect_err("usage error");
        assert!(matches!(err, EngineError::InvalidSend(_)));
    }
    assert!(net.log.is_empty());

    assert!(a.expose("#list", |_, _| Ok(Value::Null)).is_err());
    let bad_name = RpcEngine::with_clock(
        EngineConfig::named("a,b"),
        Arc::new(net.log.clone()),
        Arc::new(net.clock.clone()),
    );
    assert!(matches!(bad_name, Err(EngineError::Core(_))));
}

#[test]
fn persist_failure_is_reported_and_drops_handler() {
    let net = Network::new();
    let mut a = net.engine("A");
    let a_events = record_events(&mut a);
    net.log.set_append_fault(Some("disk full".to_string()));

    let id = a
        .send(Outgoing::new("echo").to("B").on_reply(|_, _| Ok(())))
        .expect("usage is valid");
    assert_eq!(id, None);
    assert_eq!(a.pending_callbacks(), 0);
    assert_eq!(count_matching(&errors(&a_events), "failed to persist echo to B"), 1);
}
