//! Shared framework for protocol integration tests.
//!
//! Provides a deterministic in-memory wallet good enough to drive the full
//! trade protocol: real secp256k1 multisig signatures over real sighashes,
//! dummy witnesses for funding inputs (a node would validate those), and
//! recorded broadcasts with controllable confirmation counts.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::Mutex,
};

use bitcoin::{
    ecdsa::Signature,
    hashes::Hash as _,
    secp256k1::{All, Secp256k1, SecretKey},
    Amount, OutPoint, PublicKey, Script, ScriptBuf, Transaction, Txid, WPubkeyHash,
};

use escrowtrade::{
    protocol::{contract, messages::RawTransactionInput},
    wallet::{AddressEntry, FundingSelection, KeyContext, WalletApi, WalletError},
};

/// Fresh store path under the system temp dir.
pub fn temp_store_path(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("escrowtrade-it-{name}.cbor"));
    if path.exists() {
        std::fs::remove_file(&path).unwrap();
    }
    path
}

struct WalletInner {
    key_counter: u8,
    script_counter: u8,
    multisig_keys: HashMap<String, SecretKey>,
    reservations: HashMap<String, AddressEntry>,
    utxos: Vec<RawTransactionInput>,
    broadcast: Vec<Transaction>,
    confirmations: HashMap<Txid, u32>,
}

/// Deterministic in-memory wallet; one instance per simulated party.
pub struct TestWallet {
    seed: u8,
    secp: Secp256k1<All>,
    inner: Mutex<WalletInner>,
}

impl TestWallet {
    /// A wallet pre-loaded with one spendable P2WPKH coin per value.
    pub fn new(seed: u8, utxo_values: &[u64]) -> Self {
        let utxos = utxo_values
            .iter()
            .enumerate()
            .map(|(i, value)| RawTransactionInput {
                outpoint: OutPoint {
                    txid: Txid::from_byte_array([seed.wrapping_add(i as u8 + 1); 32]),
                    vout: i as u32,
                },
                value: Amount::from_sat(*value),
                script_pubkey: ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array(
                    [seed.wrapping_add(i as u8); 20],
                )),
            })
            .collect();
        Self {
            seed,
            secp: Secp256k1::new(),
            inner: Mutex::new(WalletInner {
                key_counter: 0,
                script_counter: 0,
                multisig_keys: HashMap::new(),
                reservations: HashMap::new(),
                utxos,
                broadcast: Vec::new(),
                confirmations: HashMap::new(),
            }),
        }
    }

    /// Swaps one coin's script for a legacy P2PKH spend, which the escrow
    /// builder must refuse.
    pub fn make_utxo_legacy(&self, index: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.utxos[index].script_pubkey =
            ScriptBuf::new_p2pkh(&bitcoin::PubkeyHash::from_byte_array([0x99; 20]));
    }

    /// Everything this wallet broadcast, in order.
    pub fn broadcast_txs(&self) -> Vec<Transaction> {
        self.inner.lock().unwrap().broadcast.clone()
    }

    /// Overrides the confirmation count of a transaction (e.g. to let the
    /// counterparty's wallet see the deposit).
    pub fn set_confirmations(&self, txid: Txid, confirmations: u32) {
        self.inner
            .lock()
            .unwrap()
            .confirmations
            .insert(txid, confirmations);
    }

    /// Whether any reservation for the trade is still held.
    pub fn has_reservation(&self, trade_id: &str) -> bool {
        self.inner.lock().unwrap().reservations.contains_key(trade_id)
    }

    fn secret_key(&self, counter: u8) -> SecretKey {
        let mut bytes = [self.seed | 1; 32];
        bytes[31] = counter.wrapping_add(1);
        SecretKey::from_slice(&bytes).unwrap()
    }
}

impl WalletApi for TestWallet {
    fn reserve_multisig_key(&self, trade_id: &str) -> Result<PublicKey, WalletError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.reservations.get(trade_id) {
            return Ok(entry.pubkey);
        }
        inner.key_counter += 1;
        let sk = self.secret_key(inner.key_counter);
        let pubkey = PublicKey::new(bitcoin::secp256k1::PublicKey::from_secret_key(
            &self.secp, &sk,
        ));
        inner.multisig_keys.insert(trade_id.to_string(), sk);
        inner.reservations.insert(
            trade_id.to_string(),
            AddressEntry {
                trade_id: trade_id.to_string(),
                context: KeyContext::MultiSig,
                pubkey,
                coin_locked: Amount::ZERO,
            },
        );
        Ok(pubkey)
    }

    fn multisig_key_entry(&self, trade_id: &str) -> Result<Option<AddressEntry>, WalletError> {
        Ok(self.inner.lock().unwrap().reservations.get(trade_id).cloned())
    }

    fn lock_escrow_amount(&self, trade_id: &str, amount: Amount) -> Result<(), WalletError> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .reservations
            .get_mut(trade_id)
            .ok_or_else(|| WalletError::MissingReservation(trade_id.to_string()))?;
        entry.coin_locked = amount;
        Ok(())
    }

    fn release_trade_keys(&self, trade_id: &str) -> Result<(), WalletError> {
        let mut inner = self.inner.lock().unwrap();
        inner.reservations.remove(trade_id);
        inner.multisig_keys.remove(trade_id);
        Ok(())
    }

    fn select_funding_inputs(&self, target: Amount) -> Result<FundingSelection, WalletError> {
        let mut inner = self.inner.lock().unwrap();
        let mut selected = Vec::new();
        let mut total = Amount::ZERO;
        for utxo in &inner.utxos {
            selected.push(utxo.clone());
            total += utxo.value;
            if total >= target {
                break;
            }
        }
        if total < target {
            return Err(WalletError::InsufficientFund {
                available: total.to_sat(),
                required: target.to_sat(),
            });
        }
        inner.script_counter += 1;
        let change_script = ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array(
            [self.seed.wrapping_add(0x40 + inner.script_counter); 20],
        ));
        Ok(FundingSelection {
            inputs: selected,
            change_script,
        })
    }

    fn fresh_script_pubkey(&self) -> Result<ScriptBuf, WalletError> {
        let mut inner = self.inner.lock().unwrap();
        inner.script_counter += 1;
        Ok(ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array(
            [self.seed.wrapping_add(0x80 + inner.script_counter); 20],
        )))
    }

    fn sign_funding_inputs(
        &self,
        tx: &mut Transaction,
        own_inputs: &[RawTransactionInput],
    ) -> Result<(), WalletError> {
        for raw in own_inputs {
            let index = tx
                .input
                .iter()
                .position(|txin| txin.previous_output == raw.outpoint)
                .ok_or_else(|| {
                    WalletError::General("own input missing from transaction".to_string())
                })?;
            // Shape of a P2WPKH witness; a node would verify the real thing.
            let mut witness = bitcoin::Witness::new();
            witness.push(vec![0xab; 71]);
            witness.push(vec![0x02; 33]);
            tx.input[index].witness = witness;
        }
        Ok(())
    }

    fn sign_multisig_input(
        &self,
        trade_id: &str,
        tx: &Transaction,
        input_index: usize,
        redeemscript: &Script,
        escrow_value: Amount,
    ) -> Result<Signature, WalletError> {
        let inner = self.inner.lock().unwrap();
        let sk = inner
            .multisig_keys
            .get(trade_id)
            .ok_or_else(|| WalletError::MissingReservation(trade_id.to_string()))?;
        Ok(contract::sign_multisig_input(
            tx,
            input_index,
            redeemscript,
            escrow_value,
            sk,
        )?)
    }

    fn broadcast(&self, tx: &Transaction) -> Result<Txid, WalletError> {
        let mut inner = self.inner.lock().unwrap();
        let txid = tx.compute_txid();
        inner.broadcast.push(tx.clone());
        inner.confirmations.entry(txid).or_insert(1);
        Ok(txid)
    }

    fn confirmations(&self, txid: &Txid) -> Result<u32, WalletError> {
        Ok(*self
            .inner
            .lock()
            .unwrap()
            .confirmations
            .get(txid)
            .unwrap_or(&0))
    }
}
