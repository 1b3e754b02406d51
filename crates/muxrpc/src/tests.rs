use crate::envelope::*;
use crate::frame::*;
use crate::*;

/// Sends a message through an envelope and through the envelope's byte form.
fn through_wire_c2s(msg: &ClientToServer) -> ClientToServer {
    let env = msg.to_envelope().expect("encode envelope");
    let bytes = env.to_bytes().expect("flatten envelope");
    let env = Envelope::from_bytes(&bytes).expect("parse envelope");
    ClientToServer::from_envelope(&env).expect("decode message")
}

fn through_wire_s2c(msg: &ServerToClient) -> ServerToClient {
    let env = msg.to_envelope().expect("encode envelope");
    let bytes = env.to_bytes().expect("flatten envelope");
    let env = Envelope::from_bytes(&bytes).expect("parse envelope");
    ServerToClient::from_envelope(&env).expect("decode message")
}

// ============================================================================
//  ROUND TRIPS AT THE EDGES
// ============================================================================

#[test]
fn test_rpc_request_boundaries() {
    for id in [0, u64::MAX] {
        let msg = ClientToServer::RpcRequest {
            reply_to: "rpc.client.alice.1f".into(),
            id: RequestId(id),
            method: "getBalances".into(),
            args: Vec::new(),
        };
        assert_eq!(through_wire_c2s(&msg), msg);
    }
}

#[test]
fn test_rpc_request_with_arguments() {
    let msg = ClientToServer::RpcRequest {
        reply_to: "rpc.client.bob".into(),
        id: RequestId(7),
        method: "startFlow".into(),
        args: vec![
            Value::String("CashIssue".into()),
            Value::Record(vec![("amount".into(), Value::U64(123))]),
            Value::Option(None),
        ],
    };
    assert_eq!(through_wire_c2s(&msg), msg);
}

#[test]
fn test_observables_closed_boundaries() {
    for ids in [vec![], vec![ObservableId(0)], vec![ObservableId(1), ObservableId(u64::MAX)]] {
        let msg = ClientToServer::ObservablesClosed { ids };
        assert_eq!(through_wire_c2s(&msg), msg);
    }
}

#[test]
fn test_rpc_reply_success_and_failure() {
    for id in [0, u64::MAX] {
        let ok = ServerToClient::RpcReply {
            id: RequestId(id),
            result: Ok(Value::Observable(ObservableId(id))),
        };
        assert_eq!(through_wire_s2c(&ok), ok);

        let err = ServerToClient::RpcReply {
            id: RequestId(id),
            result: Err(Failure::Application("flow failed".into())),
        };
        assert_eq!(through_wire_s2c(&err), err);
    }
}

#[test]
fn test_observation_every_notification() {
    for notification in [
        Notification::Next(Value::String("A".into())),
        Notification::Next(Value::List(vec![Value::Observable(ObservableId(5))])),
        Notification::Error(Failure::Application("stream broke".into())),
        Notification::Completed,
    ] {
        for id in [0, u64::MAX] {
            let msg = ServerToClient::Observation { id: ObservableId(id), notification: notification.clone() };
            assert_eq!(through_wire_s2c(&msg), msg);
        }
    }
}

// ============================================================================
//  ATTRIBUTES
// ============================================================================

#[test]
fn test_scalars_live_in_attributes() {
    let msg = ClientToServer::RpcRequest {
        reply_to: "rpc.client.x".into(),
        id: RequestId(42),
        method: "ping".into(),
        args: vec![],
    };
    let env = msg.to_envelope().unwrap();
    assert_eq!(env.u64_attr(ATTR_TAG), Ok(TAG_RPC_REQUEST));
    assert_eq!(env.u64_attr(ATTR_RPC_ID), Ok(42));
    assert_eq!(env.str_attr(ATTR_METHOD_NAME), Ok("ping"));
    assert_eq!(env.str_attr(ATTR_REPLY_TO), Ok("rpc.client.x"));

    let obs = ServerToClient::Observation { id: ObservableId(9), notification: Notification::Completed };
    let env = obs.to_envelope().unwrap();
    assert_eq!(env.u64_attr(ATTR_TAG), Ok(TAG_OBSERVATION));
    assert_eq!(env.u64_attr(ATTR_OBSERVABLE_ID), Ok(9));
    assert!(env.attribute(ATTR_RPC_ID).is_none());
}

// ============================================================================
//  DECODING FAILURES
// ============================================================================

#[test]
fn test_unknown_tag_rejected() {
    let mut env = Envelope::new(Vec::new());
    env.set_u64(ATTR_TAG, 99);
    assert!(matches!(ClientToServer::from_envelope(&env), Err(Error::UnknownVariant(_))));
    assert!(matches!(ServerToClient::from_envelope(&env), Err(Error::UnknownVariant(_))));
}

#[test]
fn test_missing_tag_rejected() {
    let env = Envelope::new(Vec::new());
    assert_eq!(ClientToServer::from_envelope(&env), Err(Error::MissingAttribute(ATTR_TAG)));
}

#[test]
fn test_misdirected_messages_rejected() {
    let reply = ServerToClient::RpcReply { id: RequestId(1), result: Ok(Value::Unit) };
    let env = reply.to_envelope().unwrap();
    assert!(ClientToServer::from_envelope(&env).is_err());

    let obs = ServerToClient::Observation { id: ObservableId(1), notification: Notification::Completed };
    let env = obs.to_envelope().unwrap();
    assert!(ClientToServer::from_envelope(&env).is_err());

    let closed = ClientToServer::ObservablesClosed { ids: vec![ObservableId(3)] };
    let env = closed.to_envelope().unwrap();
    assert!(ServerToClient::from_envelope(&env).is_err());
}

#[test]
fn test_truncated_bodies_rejected() {
    let msg = ServerToClient::Observation {
        id: ObservableId(3),
        notification: Notification::Next(Value::Record(vec![("k".into(), Value::String("v".into()))])),
    };
    let env = msg.to_envelope().unwrap();
    let body = env.body().to_vec();

    for cut in 0..body.len() {
        let mut truncated = Envelope::new(body[..cut].to_vec());
        for (name, attr) in env.attributes() {
            match attr {
                Attribute::U64(v) => truncated.set_u64(name, *v),
                Attribute::Str(s) => truncated.set_str(name, s.clone()),
            }
        }
        assert!(ServerToClient::from_envelope(&truncated).is_err(), "cut at {}", cut);
    }
}

#[test]
fn test_unknown_notification_kind() -> anyhow::Result<()> {
    let mut enc = muxpack::Encoder::new();
    enc.variant_begin("paused")?;
    enc.unit()?;
    enc.variant_end()?;
    let mut env = Envelope::new(enc.into_bytes()?);
    env.set_u64(ATTR_TAG, TAG_OBSERVATION);
    env.set_u64(ATTR_OBSERVABLE_ID, 1);

    assert!(matches!(ServerToClient::from_envelope(&env), Err(Error::UnknownVariant(_))));
    Ok(())
}

#[test]
fn test_notification_helpers() {
    let next: Notification<u64> = Notification::Next(1);
    assert!(!next.is_terminal());
    assert!(Notification::<u64>::Completed.is_terminal());
    assert!(Notification::<u64>::Error(Failure::Application("x".into())).is_terminal());
    assert_eq!(next.kind(), "next");
    assert_eq!(Notification::<u64>::Completed.kind(), "completed");
}
