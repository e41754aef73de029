mod common;

use common::{dialog_pair, RecordingTransport};
use lark_sip_ua::{Dialog, DialogState};
use sip_core::{Engine, EngineConfig};
use sip_types::Method;
use std::sync::Arc;

#[tokio::test]
async fn hangup_sends_bye_on_a_fresh_transaction() {
    let transport = Arc::new(RecordingTransport::default());
    let engine = Engine::new(transport.clone(), EngineConfig::default());

    let (invite, ok) = dialog_pair();
    let mut dialog = Dialog::from_client_invite(&invite, &ok, None);

    assert_eq!(dialog.state, DialogState::Confirmed);

    let _tsx = dialog.hangup(&engine).await.unwrap();

    assert_eq!(dialog.state, DialogState::Terminated);

    let sent = transport.requests.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);

    let bye = &sent[0];
    assert_eq!(bye.method, Method::BYE);
    assert_eq!(bye.cseq.cseq, invite.cseq.cseq + 1);
    assert_eq!(bye.cseq.method, Method::BYE);
    assert_eq!(bye.call_id, invite.call_id);
    assert_eq!(bye.from.tag, invite.from.tag);
    assert_eq!(bye.to.tag, ok.to.tag);
    assert_eq!(bye.uri, ok.contact.as_ref().unwrap().uri);

    // the engine put a fresh branch on the BYE
    let branch = bye.top_via_branch().unwrap();
    assert!(branch.starts_with("z9hG4bK"));
}
