//! End-to-end scenarios for committee key generation.
//!
//! These tests exercise whole eras:
//! 1. Candidate selection from the registered miners
//! 2. Encrypted piece exchange and share derivation
//! 3. Group certification and threshold signing
//! 4. Reveal and punishment of a cheating member
//! 5. Key share expiry

use std::collections::HashSet;
use std::sync::Arc;

use committee_crypto::{
    recover_seckey, recover_threshold_signature, verify_sig, Id, Pubkey, Seckey, Signature,
};
use committee_dkg::feldman::{evaluate_shares, generate_commitments, generate_polynomial};
use committee_dkg::{
    ChainReader, CreateResultCode, EvidenceKind, GroupStoreReader, SelfMinerInfo, Stage,
};
use committee_keystore::KeyShareStore;
use committee_mock_chain::{Simulation, SimulationConfig};
use committee_types::{Hash, ProtocolParams};
use tokio::sync::mpsc;

const TEST_MESSAGE: &[u8] = b"this is test message";

fn config(members: usize, evil: usize) -> SimulationConfig {
    SimulationConfig {
        members,
        evil,
        ..SimulationConfig::default()
    }
}

/// Sign `msg` with every share and recover the group signature from the
/// first `k` partials.
fn threshold_sign(shares: &[(Id, Seckey)], k: usize, msg: &[u8]) -> Signature {
    let partials: Vec<(Id, Signature)> = shares.iter().map(|(id, sk)| (*id, sk.sign(msg))).collect();
    recover_threshold_signature(&partials, k).unwrap()
}

/// Nine members with threshold five, without a chain.
#[test]
fn test_nine_member_shares_recover_group_key() {
    let members: Vec<SelfMinerInfo> = (0..9)
        .map(|i| SelfMinerInfo::from_private_seed(format!("dealer-{i}").as_bytes(), 10, 0))
        .collect();
    let ids: Vec<Id> = members.iter().map(|m| m.id()).collect();
    let seed = Hash([42u8; 32]);
    let k = ProtocolParams::default().threshold(members.len());
    assert_eq!(k, 5);

    // Row i holds the shares member i deals to everyone
    let mut group_pubkey = Pubkey::default();
    let mut dealt: Vec<Vec<Seckey>> = Vec::new();
    for member in &members {
        let coeffs = generate_polynomial(&member.secret_seed, &seed, k);
        group_pubkey += generate_commitments(&coeffs)[0];
        dealt.push(evaluate_shares(&coeffs, &ids));
    }
    let shares: Vec<(Id, Seckey)> = ids
        .iter()
        .enumerate()
        .map(|(j, id)| (*id, dealt.iter().map(|row| row[j]).sum()))
        .collect();

    let sign = threshold_sign(&shares, k, TEST_MESSAGE);
    assert!(verify_sig(&group_pubkey, TEST_MESSAGE, &sign));
    assert!(!verify_sig(&group_pubkey, b"this is test messagf", &sign));

    // Any k shares will do
    let tail: Vec<_> = shares[4..].to_vec();
    assert_eq!(recover_seckey(&tail).unwrap().pubkey(), group_pubkey);

    // Dropping five of nine leaves fewer than k
    let short: Vec<_> = shares[..4].to_vec();
    assert_ne!(recover_seckey(&short).unwrap().pubkey(), group_pubkey);
    assert!(recover_threshold_signature(
        &short.iter().map(|(id, sk)| (*id, sk.sign(TEST_MESSAGE))).collect::<Vec<_>>(),
        k
    )
    .is_err());
}

/// Nine miners certify a group on chain and sign with it.
#[test]
fn test_nine_member_era_certifies_signing_group() {
    let mut sim = Simulation::new(config(9, 0)).unwrap();
    let report = sim.run_era();

    assert_eq!(report.candidates.len(), 9);
    assert_eq!(report.threshold, 5);
    assert_eq!(report.rejected_packets, 0);
    let result = report.result.unwrap();
    assert_eq!(result.code, CreateResultCode::Success);
    assert!(result.frozen_miners.is_empty());

    let group = result.group.unwrap();
    assert_eq!(group.members.len(), 9);
    assert_eq!(group.header.threshold, 5);
    assert_eq!(sim.chain().groups(), vec![group.clone()]);
    assert!(verify_sig(
        &group.header.group_pubkey,
        report.seed.as_bytes(),
        &result.group_sign.unwrap()
    ));

    let shares = sim.member_shares(&report.seed);
    assert_eq!(shares.len(), 9);
    let sign = threshold_sign(&shares, 5, TEST_MESSAGE);
    assert!(verify_sig(&group.header.group_pubkey, TEST_MESSAGE, &sign));

    // A different quorum recovers the same signature
    let mut reversed = shares.clone();
    reversed.reverse();
    assert_eq!(threshold_sign(&reversed, 5, TEST_MESSAGE), sign);

    // Four shares do not recover the group key
    assert_ne!(recover_seckey(&shares[..4]).unwrap().pubkey(), group.header.group_pubkey);

    for node in sim.nodes() {
        assert_eq!(node.routine.checker().stage(), Stage::Finalized);
    }
}

/// Every selected node sends each packet exactly once per era.
#[test]
fn test_each_packet_sent_once() {
    let mut sim = Simulation::new(config(6, 0)).unwrap();
    let report = sim.run_era();
    let chain = sim.chain();

    let encrypted = chain.get_encrypted_piece_packets(&report.seed);
    let senders: HashSet<Id> = encrypted.iter().map(|p| p.sender).collect();
    assert_eq!(encrypted.len(), 6);
    assert_eq!(senders.len(), 6);
    assert_eq!(chain.get_mpk_packets(&report.seed).len(), 6);
    assert!(chain.get_origin_piece_packets(&report.seed).is_empty());
    assert_eq!(report.rejected_packets, 0);

    // Replaying the round on a node changes nothing
    let node = &sim.nodes()[0];
    let enc_header = chain.query_block_header_by_height(10).unwrap();
    assert!(node
        .routine
        .check_and_send_encrypted_piece_packet(&enc_header)
        .is_err());
}

/// A member that corrupts a piece blocks the group and is punished.
#[test]
fn test_tampered_pieces_are_punished() {
    let mut sim = Simulation::new(config(7, 2)).unwrap();
    let evil: HashSet<Id> = sim.nodes().iter().filter(|n| n.evil).map(|n| n.id()).collect();
    assert_eq!(evil.len(), 2);
    let report = sim.run_era();

    let result = report.result.unwrap();
    assert_eq!(result.code, CreateResultCode::MarkEvil);
    assert!(result.group.is_none());
    assert!(sim.chain().groups().is_empty());
    assert!(sim.chain().is_origin_piece_required(&report.seed));
    assert_eq!(sim.chain().get_origin_piece_packets(&report.seed).len(), 7);

    let punishment = report.punishment.unwrap();
    let penalised: HashSet<Id> = punishment.penalty_targets.iter().copied().collect();
    assert_eq!(penalised, evil);
    assert!(punishment
        .evidence
        .iter()
        .all(|e| e.kind == EvidenceKind::InconsistentEncryption));
    assert_eq!(punishment.reward_targets.len(), 5);
    assert!(punishment.reward_targets.iter().all(|id| !evil.contains(id)));

    for node in sim.nodes() {
        assert_eq!(node.routine.checker().stage(), Stage::Failed);
    }
}

/// A member that stops mining is frozen; the rest still form a group.
#[test]
fn test_absent_members_are_frozen() {
    let mut sim = Simulation::new(config(9, 0)).unwrap();
    // Selection happens at seed height 0; the aborts only bite afterwards
    sim.advance_block();
    let gone: Vec<Id> = sim.nodes()[..1].iter().map(|n| n.id()).collect();
    for id in &gone {
        sim.chain().abort_miner(id, 2);
    }
    let report = sim.run_era();

    let result = report.result.unwrap();
    assert_eq!(result.code, CreateResultCode::Success);
    let frozen: HashSet<Id> = result.frozen_miners.iter().copied().collect();
    assert_eq!(frozen, gone.iter().copied().collect());
    let group = result.group.unwrap();
    assert_eq!(group.members.len(), 8);
    assert!(gone.iter().all(|id| !group.has_member(id)));
}

/// Replacing the seed block starts the era over on the new seed.
#[test]
fn test_seed_reorg_resets_era() {
    let mut sim = Simulation::new(config(4, 0)).unwrap();
    sim.run_era();
    sim.advance_to(100);
    let old_era = sim.checker().current_era();
    assert_eq!(old_era.seed_height, 85);
    let old_seed = old_era.seed();
    assert_eq!(sim.chain().get_encrypted_piece_packets(&old_seed).len(), 4);

    sim.chain().rewind_to(84);
    let fork = sim.chain().push_block(b"fork");
    assert_ne!(fork.hash, old_seed);
    sim.advance_to(100);

    let new_era = sim.checker().current_era();
    assert_eq!(new_era.seed_height, 85);
    assert_ne!(new_era, old_era);
    assert_eq!(new_era.seed(), fork.hash);
    for node in sim.nodes() {
        assert_eq!(node.routine.checker().current_era(), new_era);
    }
    assert_eq!(sim.chain().get_encrypted_piece_packets(&fork.hash).len(), 4);

    let report = sim.run_era();
    assert_eq!(report.seed, fork.hash);
    assert_eq!(report.result.unwrap().code, CreateResultCode::Success);
}

/// Records expiring at 100 and 500, height events 50, 150 and 600.
#[tokio::test]
async fn test_key_share_expiry_events() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keyshares.db");
    let node_key = Seckey::from_u64(99);
    let early = Hash([1u8; 32]);
    let late = Hash([5u8; 32]);
    {
        let store = KeyShareStore::open(&path, &node_key).unwrap();
        store.store_group_signature_seckey(&early, Seckey::from_u64(1), 100).unwrap();
        store.store_encryption_seckey(&late, Seckey::from_u64(2), 500).unwrap();
    }
    let store = Arc::new(KeyShareStore::open(&path, &node_key).unwrap());

    // One loop per event so each check sees a settled store
    for (height, early_left, late_left) in [(50, true, true), (150, false, true), (600, false, false)] {
        let (events, rx) = mpsc::channel(1);
        events.send(height).await.unwrap();
        drop(events);
        Arc::clone(&store).run_expiry_loop(rx).await;
        assert_eq!(store.get_key_share(&early).unwrap().is_some(), early_left, "after {height}");
        assert_eq!(store.get_key_share(&late).unwrap().is_some(), late_left, "after {height}");
    }

    drop(store);
    let reopened = KeyShareStore::open(&path, &node_key).unwrap();
    assert!(reopened.is_empty().unwrap());
}

/// Shares of dismissed groups disappear from every node.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dismissed_group_shares_expire() {
    let params = ProtocolParams {
        group_member_min: 1,
        epoch_length: 100,
        ..ProtocolParams::default()
    };
    let sim = Simulation::new(SimulationConfig {
        params,
        members: 4,
        ..SimulationConfig::default()
    })
    .unwrap()
    .with_key_expiry(1024);

    let (sim, seeds) = tokio::task::spawn_blocking(move || {
        let mut sim = sim;
        let seeds: Vec<Hash> = (0..5).map(|_| sim.run_era().seed).collect();
        sim.advance_to(420);
        (sim, seeds)
    })
    .await
    .unwrap();

    let stores: Vec<Arc<KeyShareStore>> = sim
        .nodes()
        .iter()
        .map(|n| Arc::clone(n.routine.key_store()))
        .collect();
    assert_eq!(stores[0].expire_height(&seeds[2]).unwrap(), Some(500));
    sim.shutdown().await;

    // Eras seeded in epoch 0 dismiss at 400; later ones outlive height 420
    for store in &stores {
        assert!(store.get_key_share(&seeds[0]).unwrap().is_none());
        assert!(store.get_key_share(&seeds[1]).unwrap().is_none());
        for seed in &seeds[2..] {
            assert!(store.get_group_signature_seckey(seed).unwrap().is_some());
        }
    }
}

/// Selection is a pure function of the seed block and the miner set.
#[test]
fn test_selection_is_deterministic_across_nodes() {
    let mut a = Simulation::new(config(12, 0)).unwrap();
    let mut b = Simulation::new(config(12, 0)).unwrap();
    a.advance_to(10);
    b.advance_to(10);
    let picked: Vec<Id> = a.checker().candidates().iter().map(|c| c.id).collect();
    assert_eq!(picked.len(), 12);
    assert_eq!(
        picked,
        b.checker().candidates().iter().map(|c| c.id).collect::<Vec<_>>()
    );
    for node in a.nodes() {
        let seen: Vec<Id> = node.routine.checker().candidates().iter().map(|c| c.id).collect();
        assert_eq!(seen, picked);
    }

    // A pool no larger than the group cap is taken whole
    let registered: Vec<Id> = a.nodes().iter().map(|n| n.id()).collect();
    let picked_set: HashSet<Id> = picked.iter().copied().collect();
    assert_eq!(picked_set, registered.iter().copied().collect());
}
