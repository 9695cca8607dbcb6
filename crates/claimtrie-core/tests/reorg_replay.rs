//! Rollback, replay and determinism of the block processor.

mod common;

use bitcoin::ScriptBuf;
use claimtrie_core::{
    BlockProcessor, ClaimScript, ClaimTrieError, ClaimTrieStore, DelayException, DelayFormula,
    OutputPayload, TxOutput,
};
use common::{params, Harness};

fn build_contested_name() -> Harness {
    let mut h = Harness::new(13);
    let (a, _) = h.claim("foo", 10);
    h.mine();
    h.mine_to(1000);
    h.claim("foo", 20);
    h.mine();
    h.mine_to(1009);
    h.support("foo", a, 14);
    h.mine();
    h.mine_to(1019);
    h.claim("foo", 50);
    h.mine();
    h
}

#[test]
fn rollback_and_replay_is_identical() {
    let mut h = build_contested_name();
    h.mine_to(1040);
    let at_1040 = h.processor.store().to_json().unwrap();
    h.mine_to(1060);
    let at_1060 = h.processor.store().to_json().unwrap();

    h.processor.rollback_to(1040).unwrap();
    assert_eq!(h.processor.tip().unwrap().height, 1040);
    assert_eq!(h.processor.store().to_json().unwrap(), at_1040);

    let replay: Vec<_> = h.blocks.iter().filter(|b| b.height > 1040).cloned().collect();
    for block in &replay {
        h.processor.process_block(block).unwrap();
    }
    assert_eq!(h.processor.store().to_json().unwrap(), at_1060);
}

#[test]
fn fork_replaces_takeover() {
    let mut h = Harness::new(1);
    let (a, _) = h.claim("foo", 10);
    h.mine();
    h.mine_to(9);
    let (b, _) = h.claim("foo", 100);
    h.mine();
    assert_eq!(h.controller("foo"), Some(b.claim_id()));
    h.mine_to(12);

    h.fork_at(9, "alt");
    let alt = h.next_block();
    let err = h.processor.process_block(&alt).unwrap_err();
    assert!(err.is_reorg());

    h.processor.rollback_to(9).unwrap();
    h.processor.process_block(&alt).unwrap();
    assert_eq!(h.tip(), 10);
    assert_eq!(h.controller("foo"), Some(a.claim_id()));
    assert!(h.processor.get_claim(&b).is_none());
    let log = h.processor.store().takeovers_for_name(&"foo".into());
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].claim_hash, a);
}

#[test]
fn rollback_is_bounded_by_undo_depth() {
    let mut h = Harness::with_params(1, params().with_undo_depth(5));
    h.mine_to(20);
    let err = h.processor.rollback_to(14).unwrap_err();
    assert!(matches!(err, ClaimTrieError::RollbackTooDeep { target: 14, oldest: 15 }));
    assert_eq!(h.processor.tip().unwrap().height, 20);
    h.processor.rollback_to(15).unwrap();
    assert_eq!(h.processor.tip().unwrap().height, 15);
}

#[test]
fn two_processors_agree() {
    let mut h = build_contested_name();
    h.mine_to(1100);

    let mut other = BlockProcessor::in_memory(params()).unwrap();
    for block in &h.blocks {
        other.process_block(block).unwrap();
    }
    assert_eq!(other.store().to_json().unwrap(), h.processor.store().to_json().unwrap());
}

#[test]
fn controller_matches_resolution_at_every_height() {
    let mut h = Harness::new(1);
    let (a, a_txo) = h.claim("foo", 10);
    h.mine();
    h.mine_to(64);
    h.claim("foo", 11);
    let (c, _) = h.claim("bar", 3);
    h.mine();
    h.support("bar", c, 1);
    h.spend(a_txo);
    h.mine();
    h.mine_to(90);

    let mut replay = BlockProcessor::in_memory(params()).unwrap();
    for block in &h.blocks {
        replay.process_block(block).unwrap();
        for name in replay.store().names() {
            let expected =
                claimtrie_core::TakeoverResolver::resolve_controller(replay.store(), &name, block.height);
            assert_eq!(replay.store().name_state(&name).controller, expected, "{name} at {}", block.height);
        }
    }
    assert!(replay.get_claim(&a).is_none());
}

#[test]
fn raw_scripts_are_decoded() {
    let mut h = Harness::new(1);
    let payee = ScriptBuf::new();
    let op = ClaimScript::ClaimName { name: "Raw".into(), value: b"{}".to_vec() };
    let script = op.to_script(&payee).unwrap();
    let txid = h.raw_tx(
        vec![],
        vec![
            TxOutput { value: 7, payload: OutputPayload::Script(script) },
            TxOutput { value: 9, payload: OutputPayload::Script(ScriptBuf::from_bytes(vec![0xb5])) },
            TxOutput { value: 1, payload: OutputPayload::Plain },
        ],
    );
    let cs = h.mine();

    let claims = h.processor.get_claims_for_name(&"raw".into());
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].txo.txid, txid);
    assert_eq!(claims[0].txo.vout, 0);
    assert_eq!(claims[0].amount, 7);
    assert_eq!(cs.newly_activated, vec![claims[0].claim_id()]);
}

#[test]
fn delay_exception_applies_inside_its_window() {
    let params = params().with_exception(DelayException {
        start_height: 100,
        end_height: 200,
        formula: DelayFormula::Fixed { blocks: 2 },
    });
    let mut h = Harness::with_params(1, params);
    h.claim("foo", 10);
    h.mine();
    h.mine_to(149);
    let (b, _) = h.claim("foo", 20);
    h.mine();
    assert_eq!(h.activation_height(&b), 152);
    h.mine_to(151);
    assert_ne!(h.controller("foo"), Some(b.claim_id()));
    h.mine();
    assert_eq!(h.controller("foo"), Some(b.claim_id()));
}

#[test]
fn invalid_params_are_rejected() {
    let mut bad = params();
    bad.proportional_delay_factor = 0;
    let err = BlockProcessor::in_memory(bad).err().unwrap();
    assert!(matches!(err, ClaimTrieError::ConfigInvalid { .. }));
}
