//! End-to-end chain scenarios: mine, verify, apply, and replay blocks
//! against fresh temporary stores, without any networking.

use std::sync::atomic::AtomicBool;

use num_bigint::BigUint;
use num_traits::Zero;

use ember_chain::{
    core::{
        block::Block,
        chain::Chain,
        params,
        state::AccountSource,
        transaction::{AdditionalData, Transaction},
        utils,
    },
    crypto::KeyPair,
    node::{mempool::Mempool, miner},
};

fn temp_chain() -> Chain {
    let db = sled::Config::new()
        .temporary(true)
        .open()
        .expect("temporary sled db");
    Chain::open_db(db).unwrap()
}

/// Assemble and mine the next block from the given body transactions
fn mine_block(chain: &Chain, miner_key: &KeyPair, body: Vec<Transaction>, timestamp: u64) -> Block {
    let head = chain.latest_block();
    let reward = body.iter().fold(params::block_reward(), |sum, tx| {
        sum + &tx.gas + tx.contract_gas()
    });
    let coinbase = Transaction::coinbase(miner_key.address(), reward, timestamp).unwrap();

    let mut transactions = vec![coinbase];
    transactions.extend(body);

    let block = Block::new(
        head.block_number + 1,
        timestamp,
        transactions,
        chain.difficulty(),
        head.hash,
    );
    miner::search_nonce(block, &AtomicBool::new(false))
        .unwrap()
        .expect("uncancelled search always finds a nonce")
}

fn transfer(
    sender: &KeyPair,
    recipient: String,
    amount: u64,
    data: AdditionalData,
    timestamp: u64,
) -> Transaction {
    let mut tx = Transaction::new(
        recipient,
        BigUint::from(amount),
        params::min_tx_fee(),
        data,
        timestamp,
    );
    tx.sign(sender).unwrap();
    tx
}

#[test]
fn empty_chain_mines_its_first_block() {
    let chain = temp_chain();
    let miner_key = KeyPair::generate();
    let genesis = chain.latest_block();

    let block = mine_block(&chain, &miner_key, vec![], utils::now_ms());
    chain.accept_block(&block, false).unwrap();

    assert_eq!(chain.height(), 1);
    let head = chain.latest_block();
    assert_eq!(head.parent_hash, genesis.hash);
    assert_eq!(head.transactions.len(), 1);
    assert_eq!(head.transactions[0].amount, params::block_reward());
    // persisted under its decimal key
    assert_eq!(chain.block_by_number(1).unwrap().unwrap(), head);
}

#[tokio::test]
async fn transfer_reaches_recipient_through_pool_and_block() {
    let chain = temp_chain();
    let miner_key = KeyPair::generate();
    let faucet = params::faucet_keypair();
    let recipient_key = KeyPair::generate();

    let tx = transfer(
        &faucet,
        recipient_key.address(),
        5,
        AdditionalData::default(),
        utils::now_ms(),
    );

    let mempool = Mempool::new();
    mempool.add(tx.clone(), chain.state_store()).await.unwrap();
    let candidates = mempool.take_candidates().await;
    assert_eq!(candidates, vec![tx]);

    let block = mine_block(&chain, &miner_key, candidates, utils::now_ms());
    chain.accept_block(&block, false).unwrap();

    let recipient = chain.account(&recipient_key.address()).unwrap().unwrap();
    assert_eq!(recipient.balance, BigUint::from(5u8));

    // consumed entries drop out at revalidation
    mempool.revalidate(chain.state_store()).await;
    assert_eq!(mempool.len().await, 0);
}

#[tokio::test]
async fn replayed_timestamp_is_rejected_at_submission() {
    let chain = temp_chain();
    let faucet = params::faucet_keypair();
    let mempool = Mempool::new();
    let timestamp = utils::now_ms();

    let first = transfer(&faucet, "b".repeat(64), 5, AdditionalData::default(), timestamp);
    let second = transfer(&faucet, "c".repeat(64), 9, AdditionalData::default(), timestamp);

    mempool.add(first, chain.state_store()).await.unwrap();
    assert!(mempool.add(second, chain.state_store()).await.is_err());
}

#[test]
fn contract_deploy_then_call_accumulates_storage() {
    let chain = temp_chain();
    let miner_key = KeyPair::generate();
    let faucet = params::faucet_keypair();
    let contract_address = KeyPair::generate().address();

    let deploy = transfer(
        &faucet,
        contract_address.clone(),
        1,
        AdditionalData {
            contract_gas: Some(params::min_contract_fee()),
            sc_body: Some("PUSH 1 PUSH 2 ADD SSTORE x HALT".to_string()),
            storage_map: None,
        },
        utils::now_ms(),
    );
    let block = mine_block(&chain, &miner_key, vec![deploy], utils::now_ms());
    chain.accept_block(&block, false).unwrap();

    let call = transfer(
        &faucet,
        contract_address.clone(),
        1,
        AdditionalData {
            contract_gas: Some(params::min_contract_fee()),
            sc_body: None,
            storage_map: None,
        },
        utils::now_ms() + 1,
    );
    let block = mine_block(&chain, &miner_key, vec![call], utils::now_ms() + 1);
    chain.accept_block(&block, false).unwrap();

    let contract = chain.account(&contract_address).unwrap().unwrap();
    assert!(contract.has_code());
    assert_eq!(contract.storage.get("x"), Some(&"3".to_string()));
}

#[test]
fn block_at_gas_limit_passes_and_one_over_fails() {
    let faucet = params::faucet_keypair();
    let miner_key = KeyPair::generate();

    let at_limit = {
        let chain = temp_chain();
        let tx = transfer(
            &faucet,
            "b".repeat(64),
            1,
            AdditionalData {
                contract_gas: Some(params::block_gas_limit()),
                sc_body: None,
                storage_map: None,
            },
            utils::now_ms(),
        );
        let block = mine_block(&chain, &miner_key, vec![tx], utils::now_ms());
        chain.accept_block(&block, false)
    };
    assert!(at_limit.is_ok());

    let over_limit = {
        let chain = temp_chain();
        let tx = transfer(
            &faucet,
            "b".repeat(64),
            1,
            AdditionalData {
                contract_gas: Some(params::block_gas_limit() + 1u8),
                sc_body: None,
                storage_map: None,
            },
            utils::now_ms(),
        );
        let block = mine_block(&chain, &miner_key, vec![tx], utils::now_ms());
        chain.accept_block(&block, false)
    };
    assert!(over_limit.is_err());
}

#[test]
fn replaying_a_stored_chain_reproduces_the_state() {
    let source = temp_chain();
    let miner_key = KeyPair::generate();
    let faucet = params::faucet_keypair();
    let recipient = KeyPair::generate().address();

    for i in 0..3u64 {
        let tx = transfer(
            &faucet,
            recipient.clone(),
            7,
            AdditionalData::default(),
            utils::now_ms() + i,
        );
        let block = mine_block(&source, &miner_key, vec![tx], utils::now_ms() + i);
        source.accept_block(&block, false).unwrap();
    }

    // a cold node replays the stored blocks in order
    let replica = temp_chain();
    for number in 1..=source.height() {
        let block = source.block_by_number(number).unwrap().unwrap();
        replica.accept_block(&block, false).unwrap();
    }

    assert_eq!(replica.height(), source.height());
    assert_eq!(replica.latest_block(), source.latest_block());
    assert_eq!(
        replica.account(&recipient).unwrap().unwrap().balance,
        BigUint::from(21u8)
    );

    // total supply grew by exactly one reward per block
    let total: BigUint = replica
        .state_store()
        .accounts()
        .unwrap()
        .into_iter()
        .fold(BigUint::zero(), |sum, (_, account)| sum + account.balance);
    assert_eq!(
        total,
        params::initial_supply() + params::block_reward() * 3u8
    );
}

#[test]
fn sibling_of_the_head_is_rejected() {
    let chain = temp_chain();
    let miner_key = KeyPair::generate();

    let first = mine_block(&chain, &miner_key, vec![], utils::now_ms());
    chain.accept_block(&first, false).unwrap();

    // a competing block at the same height links to the head's parent
    let mut sibling = first.clone();
    sibling.timestamp += 1;
    let sibling = miner::search_nonce(sibling, &AtomicBool::new(false))
        .unwrap()
        .unwrap();
    assert!(chain.accept_block(&sibling, false).is_err());
}

#[test]
fn served_heights_stay_within_the_chain() {
    let chain = temp_chain();
    let miner_key = KeyPair::generate();
    let block = mine_block(&chain, &miner_key, vec![], utils::now_ms());
    chain.accept_block(&block, false).unwrap();

    // the gossip layer serves 1..=height; the store agrees
    assert!(chain.block_by_number(1).unwrap().is_some());
    assert!(chain.block_by_number(2).unwrap().is_none());
}

#[test]
fn state_source_sees_committed_accounts() {
    let chain = temp_chain();
    let faucet_address = params::faucet_keypair().address();
    let account = chain.state_store().account(&faucet_address).unwrap().unwrap();
    assert_eq!(account.balance, params::initial_supply());
}
