use num_bigint::BigUint;
use num_traits::Zero;

use crate::{
    core::{
        block::Block,
        transaction::{AdditionalData, Transaction},
    },
    crypto::KeyPair,
};

/// Target spacing between blocks
pub const TARGET_BLOCK_TIME_MS: u64 = 30_000;

/// Difficulty is re-examined every this many blocks
pub const RETARGET_WINDOW: u64 = 5;

pub const INITIAL_DIFFICULTY: u64 = 1;

/// How far into the future a block timestamp may run ahead of local time
pub const MAX_CLOCK_SKEW_MS: u64 = 60_000;

pub const GENESIS_TIMESTAMP_MS: u64 = 1_690_000_000_000;

pub const GENESIS_PARENT_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// The well-known mint key. Only ever valid as the coinbase signer.
pub const MINT_PRIVATE_KEY_HEX: &str =
    "0000000000000000000000000000000000000000000000000000000000000001";

/// Development faucet funded by the genesis block
pub const FAUCET_PRIVATE_KEY_HEX: &str =
    "0000000000000000000000000000000000000000000000000000000000000002";

/// Paid to the miner for each block, in wei (1 coin = 10^18 wei)
pub fn block_reward() -> BigUint {
    BigUint::from(10u8).pow(18)
}

/// Total wei minted to the faucet at genesis (100,000,000 coins)
pub fn initial_supply() -> BigUint {
    BigUint::from(10u8).pow(26)
}

/// Per-block cap on the summed contract gas of its transactions
pub fn block_gas_limit() -> BigUint {
    BigUint::from(30_000_000u64)
}

pub fn min_tx_fee() -> BigUint {
    BigUint::from(1_000_000_000u64)
}

pub fn min_contract_fee() -> BigUint {
    BigUint::from(10_000_000u64)
}

pub fn mint_keypair() -> KeyPair {
    KeyPair::from_private_hex(MINT_PRIVATE_KEY_HEX).expect("mint key is a valid secp256k1 scalar")
}

pub fn faucet_keypair() -> KeyPair {
    KeyPair::from_private_hex(FAUCET_PRIVATE_KEY_HEX)
        .expect("faucet key is a valid secp256k1 scalar")
}

/// The fixed genesis block: one mint transaction funding the faucet.
/// RFC-6979 signing makes the serialization identical on every node.
pub fn genesis_block() -> Block {
    let mut mint_tx = Transaction::new(
        faucet_keypair().address(),
        initial_supply(),
        BigUint::zero(),
        AdditionalData::default(),
        GENESIS_TIMESTAMP_MS,
    );
    mint_tx
        .sign(&mint_keypair())
        .expect("genesis transaction signs");

    let mut genesis = Block::new(
        0,
        GENESIS_TIMESTAMP_MS,
        vec![mint_tx],
        INITIAL_DIFFICULTY,
        GENESIS_PARENT_HASH.to_string(),
    );
    genesis.seal().expect("genesis serialization is infallible");
    genesis
}
