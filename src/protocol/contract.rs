//! Escrow contract construction and verification.
//!
//! Implements the 2-of-2 (optionally 2-of-3 with an arbitrator key) multisig
//! escrow: the combined deposit transaction funding it, the cooperative
//! payout transaction releasing it, and the time-locked delayed payout
//! transaction that acts as the safety net when cooperative payout never
//! happens.
//!
//! All constructors are deterministic: given identical contract terms and
//! identical contributed inputs they produce byte-identical unsigned
//! transactions, regardless of the order inputs were handed in. Verification
//! of a counterparty-built transaction reconstructs the expected transaction
//! locally and compares, so a party never signs anything it cannot
//! independently derive from the agreed contract.

use bitcoin::{
    absolute::LockTime,
    hashes::{sha256, Hash},
    opcodes::all::{OP_CHECKMULTISIG, OP_PUSHNUM_2, OP_PUSHNUM_3},
    script::{self, Instruction, PushBytes},
    secp256k1::{Message, Secp256k1, SecretKey},
    sighash::SighashCache,
    transaction::Version,
    Amount, EcdsaSighashType, OutPoint, PublicKey, Script, ScriptBuf, Sequence, Transaction, TxIn,
    TxOut, Witness,
};
use serde::{Deserialize, Serialize};

use super::{error::ContractError, messages::RawTransactionInput};

/// Outputs below this value are folded into the miner fee instead of being
/// created as change.
pub(crate) const DUST_LIMIT: Amount = Amount::from_sat(546);

/// All negotiated terms of one trade. Hashing this (canonical CBOR of the
/// declared field order) yields the contract hash both parties commit to
/// before any signature is exchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeContract {
    /// Trade id (the taken offer's id).
    pub trade_id: String,
    /// Trade amount moving from seller to buyer through the escrow.
    pub amount: Amount,
    /// Agreed price in counter-asset atomic units per base unit.
    pub price: u64,
    /// Buyer's security deposit.
    pub buyer_security_deposit: Amount,
    /// Seller's security deposit.
    pub seller_security_deposit: Amount,
    /// Payment method for the payment leg.
    pub payment_method_id: String,
    /// Whether the maker is the buyer of the base asset.
    pub maker_is_buyer: bool,
    /// Buyer's multisig public key.
    pub buyer_multisig_pubkey: PublicKey,
    /// Seller's multisig public key.
    pub seller_multisig_pubkey: PublicKey,
    /// Optional arbitrator key turning the escrow into a 2-of-3.
    pub arbitrator_pubkey: Option<PublicKey>,
    /// Script the buyer's payout is sent to.
    pub buyer_payout_script: ScriptBuf,
    /// Script the seller's payout is sent to.
    pub seller_payout_script: ScriptBuf,
}

impl TradeContract {
    /// Content hash of the negotiated terms.
    pub fn contract_hash(&self) -> Result<sha256::Hash, ContractError> {
        let bytes = serde_cbor::ser::to_vec(self)
            .map_err(|_| ContractError::Protocol("contract serialization failed"))?;
        Ok(sha256::Hash::hash(&bytes))
    }

    /// Human-readable rendering of the terms, carried as dispute evidence.
    pub fn as_json(&self) -> Result<String, ContractError> {
        serde_json::to_string_pretty(self)
            .map_err(|_| ContractError::Protocol("contract json rendering failed"))
    }

    /// Exact value of the escrow output:
    /// `amount + buyer_security_deposit + seller_security_deposit`.
    pub fn escrow_value(&self) -> Result<Amount, ContractError> {
        self.amount
            .checked_add(self.buyer_security_deposit)
            .and_then(|v| v.checked_add(self.seller_security_deposit))
            .ok_or(ContractError::AmountOverflow)
    }

    /// The multisig redeemscript controlling the escrow output.
    pub fn redeemscript(&self) -> ScriptBuf {
        create_multisig_redeemscript(
            &self.buyer_multisig_pubkey,
            &self.seller_multisig_pubkey,
            self.arbitrator_pubkey.as_ref(),
        )
    }

    /// P2WSH script pubkey of the escrow output.
    pub fn escrow_script_pubkey(&self) -> ScriptBuf {
        ScriptBuf::new_p2wsh(&self.redeemscript().wscript_hash())
    }

    /// Amount the maker owes into the escrow (trade amount rides with the
    /// seller's contribution).
    pub fn maker_owes(&self) -> Result<Amount, ContractError> {
        if self.maker_is_buyer {
            Ok(self.buyer_security_deposit)
        } else {
            self.amount
                .checked_add(self.seller_security_deposit)
                .ok_or(ContractError::AmountOverflow)
        }
    }

    /// Amount the taker owes into the escrow.
    pub fn taker_owes(&self) -> Result<Amount, ContractError> {
        let escrow = self.escrow_value()?;
        escrow
            .checked_sub(self.maker_owes()?)
            .ok_or(ContractError::AmountOverflow)
    }
}

/// One party's contribution to the deposit transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyInputs {
    /// The party's funding inputs.
    pub inputs: Vec<RawTransactionInput>,
    /// Script any change is returned to.
    pub change_script: ScriptBuf,
}

/// Whether a script pubkey is a spend type the escrow can be funded from.
pub fn is_segwit_v0_spend(script_pubkey: &Script) -> bool {
    script_pubkey.is_p2wpkh() || script_pubkey.is_p2wsh()
}

/// Creates the sorted-key multisig redeemscript: 2-of-2, or 2-of-3 when an
/// arbitrator key is present.
pub fn create_multisig_redeemscript(
    pubkey1: &PublicKey,
    pubkey2: &PublicKey,
    arbitrator: Option<&PublicKey>,
) -> ScriptBuf {
    let mut keys = vec![*pubkey1, *pubkey2];
    if let Some(arb) = arbitrator {
        keys.push(*arb);
    }
    // Sorted keys make the script independent of which side built it.
    keys.sort();
    let mut builder = script::Builder::new().push_opcode(OP_PUSHNUM_2);
    for key in &keys {
        builder = builder.push_key(key);
    }
    let total = if arbitrator.is_some() {
        OP_PUSHNUM_3
    } else {
        OP_PUSHNUM_2
    };
    builder
        .push_opcode(total)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script()
}

/// Extracts the public keys from a multisig redeemscript, in script order.
pub fn read_pubkeys_from_multisig_redeemscript(
    redeemscript: &Script,
) -> Result<Vec<PublicKey>, ContractError> {
    let mut keys = Vec::new();
    for instruction in redeemscript.instructions() {
        let instruction =
            instruction.map_err(|_| ContractError::Protocol("malformed redeemscript"))?;
        if let Instruction::PushBytes(push) = instruction {
            if push.len() == 33 {
                keys.push(PublicKey::from_slice(push.as_bytes())?);
            }
        }
    }
    if keys.len() < 2 {
        return Err(ContractError::Protocol(
            "redeemscript does not carry a multisig key set",
        ));
    }
    Ok(keys)
}

fn sorted_inputs(inputs: &[RawTransactionInput]) -> Vec<RawTransactionInput> {
    let mut sorted = inputs.to_vec();
    sorted.sort_by_key(|input| (input.outpoint.txid, input.outpoint.vout));
    sorted
}

fn sum_input_value(inputs: &[RawTransactionInput]) -> Result<Amount, ContractError> {
    inputs.iter().try_fold(Amount::ZERO, |acc, input| {
        acc.checked_add(input.value).ok_or(ContractError::AmountOverflow)
    })
}

fn check_spend_types(inputs: &[RawTransactionInput]) -> Result<(), ContractError> {
    for input in inputs {
        if !is_segwit_v0_spend(&input.script_pubkey) {
            return Err(ContractError::UnsupportedSpendType(input.outpoint));
        }
    }
    Ok(())
}

fn change_output(
    inputs: &[RawTransactionInput],
    owed: Amount,
    fee_share: Amount,
    change_script: &ScriptBuf,
) -> Result<Option<TxOut>, ContractError> {
    let available = sum_input_value(inputs)?;
    let required = owed
        .checked_add(fee_share)
        .ok_or(ContractError::AmountOverflow)?;
    let change = available
        .checked_sub(required)
        .ok_or(ContractError::InsufficientInputValue {
            available,
            required,
        })?;
    if change < DUST_LIMIT {
        // Sub-dust remainder is left to the miner.
        return Ok(None);
    }
    Ok(Some(TxOut {
        value: change,
        script_pubkey: change_script.clone(),
    }))
}

/// Builds the unsigned deposit transaction funding the escrow.
///
/// Output order is fixed: the escrow output, the OP_RETURN binding the
/// contract hash, then the maker's and taker's change outputs (each omitted
/// when below dust). Inputs are sorted by outpoint, so the result does not
/// depend on the order either party enumerated its coins.
///
/// The escrow output value is exactly [`TradeContract::escrow_value`]; the
/// miner fee is split between the parties and comes out of their change.
pub fn create_deposit_tx(
    contract: &TradeContract,
    maker: &PartyInputs,
    taker: &PartyInputs,
    tx_fee: Amount,
) -> Result<Transaction, ContractError> {
    check_spend_types(&maker.inputs)?;
    check_spend_types(&taker.inputs)?;
    if maker.inputs.is_empty() || taker.inputs.is_empty() {
        return Err(ContractError::Protocol(
            "both parties must contribute at least one input",
        ));
    }

    let escrow_value = contract.escrow_value()?;
    let taker_fee = tx_fee / 2;
    let maker_fee = tx_fee - taker_fee; // maker covers the odd sat

    let maker_change = change_output(
        &maker.inputs,
        contract.maker_owes()?,
        maker_fee,
        &maker.change_script,
    )?;
    let taker_change = change_output(
        &taker.inputs,
        contract.taker_owes()?,
        taker_fee,
        &taker.change_script,
    )?;

    let contract_hash = contract.contract_hash()?.to_byte_array();
    let hash_push: &PushBytes = (&contract_hash).into();

    let mut combined: Vec<RawTransactionInput> = maker.inputs.clone();
    combined.extend(taker.inputs.iter().cloned());
    let input = sorted_inputs(&combined)
        .into_iter()
        .map(|raw| TxIn {
            previous_output: raw.outpoint,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::new(),
        })
        .collect();

    let mut output = vec![
        TxOut {
            value: escrow_value,
            script_pubkey: contract.escrow_script_pubkey(),
        },
        TxOut {
            value: Amount::ZERO,
            script_pubkey: ScriptBuf::new_op_return(hash_push),
        },
    ];
    output.extend(maker_change);
    output.extend(taker_change);

    Ok(Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input,
        output,
    })
}

/// Locates the escrow output of a deposit transaction and returns its index.
pub fn find_escrow_output(
    tx: &Transaction,
    contract: &TradeContract,
) -> Result<usize, ContractError> {
    let script = contract.escrow_script_pubkey();
    tx.output
        .iter()
        .position(|out| out.script_pubkey == script)
        .ok_or(ContractError::Protocol("deposit tx has no escrow output"))
}

/// Verifies a counterparty-built deposit transaction against the agreed
/// contract and this party's own contribution.
///
/// Checks, in order: the escrow output exists and carries the exact agreed
/// value, the contract hash is bound via OP_RETURN, every one of this
/// party's inputs is spent by the transaction, and every input the
/// transaction spends is accounted for by one of the two parties'
/// contributed input lists with an acceptable spend type.
pub fn validate_deposit_tx(
    tx: &Transaction,
    contract: &TradeContract,
    my_inputs: &[RawTransactionInput],
    peer_inputs: &[RawTransactionInput],
) -> Result<(), ContractError> {
    let escrow_index = find_escrow_output(tx, contract)?;
    let expected = contract.escrow_value()?;
    let found = tx.output[escrow_index].value;
    if found != expected {
        return Err(ContractError::EscrowValueMismatch { expected, found });
    }

    let contract_hash = contract.contract_hash()?.to_byte_array();
    let hash_push: &PushBytes = (&contract_hash).into();
    let op_return = ScriptBuf::new_op_return(hash_push);
    if !tx.output.iter().any(|out| out.script_pubkey == op_return) {
        return Err(ContractError::Protocol(
            "deposit tx does not bind the contract hash",
        ));
    }

    check_spend_types(peer_inputs)?;
    for mine in my_inputs {
        if !tx
            .input
            .iter()
            .any(|txin| txin.previous_output == mine.outpoint)
        {
            return Err(ContractError::Protocol(
                "deposit tx is missing one of our contributed inputs",
            ));
        }
    }
    for txin in &tx.input {
        let known = my_inputs
            .iter()
            .chain(peer_inputs.iter())
            .any(|raw| raw.outpoint == txin.previous_output);
        if !known {
            return Err(ContractError::Protocol(
                "deposit tx spends an input neither party contributed",
            ));
        }
    }
    Ok(())
}

fn split_escrow(
    contract: &TradeContract,
    escrow_outpoint: OutPoint,
    first: (Amount, &ScriptBuf),
    second: (Amount, &ScriptBuf),
    fee: Amount,
    lock_time: LockTime,
    sequence: Sequence,
) -> Result<Transaction, ContractError> {
    let escrow_value = contract.escrow_value()?;
    let second_fee = fee / 2;
    let first_fee = fee - second_fee;
    let first_value = first
        .0
        .checked_sub(first_fee)
        .ok_or(ContractError::AmountOverflow)?;
    let second_value = second
        .0
        .checked_sub(second_fee)
        .ok_or(ContractError::AmountOverflow)?;
    let total = first_value
        .checked_add(second_value)
        .and_then(|v| v.checked_add(fee))
        .ok_or(ContractError::AmountOverflow)?;
    if total != escrow_value {
        return Err(ContractError::EscrowValueMismatch {
            expected: escrow_value,
            found: total,
        });
    }

    Ok(Transaction {
        version: Version::TWO,
        lock_time,
        input: vec![TxIn {
            previous_output: escrow_outpoint,
            script_sig: ScriptBuf::new(),
            sequence,
            witness: Witness::new(),
        }],
        output: vec![
            TxOut {
                value: first_value,
                script_pubkey: first.1.clone(),
            },
            TxOut {
                value: second_value,
                script_pubkey: second.1.clone(),
            },
        ],
    })
}

/// Builds the unsigned cooperative payout transaction: trade amount plus
/// buyer deposit to the buyer, seller deposit back to the seller, the miner
/// fee split between them.
pub fn create_payout_tx(
    contract: &TradeContract,
    escrow_outpoint: OutPoint,
    fee: Amount,
) -> Result<Transaction, ContractError> {
    let buyer_amount = contract
        .amount
        .checked_add(contract.buyer_security_deposit)
        .ok_or(ContractError::AmountOverflow)?;
    split_escrow(
        contract,
        escrow_outpoint,
        (buyer_amount, &contract.buyer_payout_script),
        (
            contract.seller_security_deposit,
            &contract.seller_payout_script,
        ),
        fee,
        LockTime::ZERO,
        Sequence::ENABLE_RBF_NO_LOCKTIME,
    )
}

/// Builds the unsigned delayed payout transaction: a time-locked refund
/// returning each party its own contribution (trade amount rides back with
/// the seller), spendable only once `lock_time` passes.
pub fn create_delayed_payout_tx(
    contract: &TradeContract,
    escrow_outpoint: OutPoint,
    fee: Amount,
    lock_time: LockTime,
) -> Result<Transaction, ContractError> {
    let seller_amount = contract
        .amount
        .checked_add(contract.seller_security_deposit)
        .ok_or(ContractError::AmountOverflow)?;
    split_escrow(
        contract,
        escrow_outpoint,
        (seller_amount, &contract.seller_payout_script),
        (
            contract.buyer_security_deposit,
            &contract.buyer_payout_script,
        ),
        fee,
        lock_time,
        Sequence::ENABLE_LOCKTIME_NO_RBF,
    )
}

/// Verifies a counterparty-built cooperative payout transaction by
/// reconstructing the expected transaction and comparing.
pub fn validate_payout_tx(
    tx: &Transaction,
    contract: &TradeContract,
    escrow_outpoint: OutPoint,
    fee: Amount,
) -> Result<(), ContractError> {
    let expected = create_payout_tx(contract, escrow_outpoint, fee)?;
    if *tx != expected {
        return Err(ContractError::Protocol(
            "payout tx deviates from the contract split",
        ));
    }
    Ok(())
}

/// Verifies a counterparty-built delayed payout transaction.
///
/// The transaction must equal the locally reconstructed refund for its own
/// lock time, and that lock time must be a wall-clock lock strictly later
/// than `deposit_confirm_time` (the escrow's confirmation timestamp).
pub fn validate_delayed_payout_tx(
    tx: &Transaction,
    contract: &TradeContract,
    escrow_outpoint: OutPoint,
    fee: Amount,
    deposit_confirm_time: u64,
) -> Result<(), ContractError> {
    let lock_time = match tx.lock_time {
        LockTime::Seconds(time) => time,
        LockTime::Blocks(_) => {
            return Err(ContractError::Protocol(
                "delayed payout lock time must be wall-clock based",
            ))
        }
    };
    if u64::from(lock_time.to_consensus_u32()) <= deposit_confirm_time {
        return Err(ContractError::Protocol(
            "delayed payout lock time is not later than the deposit confirmation",
        ));
    }
    let expected = create_delayed_payout_tx(contract, escrow_outpoint, fee, tx.lock_time)?;
    if *tx != expected {
        return Err(ContractError::Protocol(
            "delayed payout tx deviates from the contract refund split",
        ));
    }
    Ok(())
}

/// Computes the signature hash for spending the escrow output.
pub fn multisig_sighash(
    tx: &Transaction,
    input_index: usize,
    redeemscript: &Script,
    escrow_value: Amount,
) -> Result<Message, ContractError> {
    let sighash = SighashCache::new(tx).p2wsh_signature_hash(
        input_index,
        redeemscript,
        escrow_value,
        EcdsaSighashType::All,
    )?;
    Ok(Message::from_digest(sighash.to_byte_array()))
}

/// Produces one party's signature over an escrow-spending input.
pub fn sign_multisig_input(
    tx: &Transaction,
    input_index: usize,
    redeemscript: &Script,
    escrow_value: Amount,
    privkey: &SecretKey,
) -> Result<bitcoin::ecdsa::Signature, ContractError> {
    let secp = Secp256k1::new();
    let message = multisig_sighash(tx, input_index, redeemscript, escrow_value)?;
    Ok(bitcoin::ecdsa::Signature::sighash_all(
        secp.sign_ecdsa(&message, privkey),
    ))
}

/// Verifies one party's signature over an escrow-spending input.
pub fn verify_multisig_signature(
    tx: &Transaction,
    input_index: usize,
    redeemscript: &Script,
    escrow_value: Amount,
    signature: &bitcoin::ecdsa::Signature,
    pubkey: &PublicKey,
) -> Result<(), ContractError> {
    if signature.sighash_type != EcdsaSighashType::All {
        return Err(ContractError::Protocol("unexpected sighash type"));
    }
    let secp = Secp256k1::verification_only();
    let message = multisig_sighash(tx, input_index, redeemscript, escrow_value)?;
    secp.verify_ecdsa(&message, &signature.signature, &pubkey.inner)?;
    Ok(())
}

/// Assembles the witness releasing the escrow, given both (or, for 2-of-3,
/// any two) parties' signatures keyed by signer.
///
/// Signatures are placed in redeemscript key order, as CHECKMULTISIG
/// demands, below the leading dummy element.
pub fn finalize_multisig_spend(
    mut tx: Transaction,
    redeemscript: &Script,
    signatures: &[(PublicKey, bitcoin::ecdsa::Signature)],
) -> Result<Transaction, ContractError> {
    let script_keys = read_pubkeys_from_multisig_redeemscript(redeemscript)?;
    let mut ordered = Vec::new();
    for key in &script_keys {
        if let Some((_, sig)) = signatures.iter().find(|(pk, _)| pk == key) {
            ordered.push(*sig);
        }
    }
    if ordered.len() < 2 {
        return Err(ContractError::Protocol(
            "need two valid co-signatures to release the escrow",
        ));
    }
    let mut witness = Witness::new();
    witness.push(&[] as &[u8]); // CHECKMULTISIG consumes one extra stack element
    for sig in ordered.iter().take(2) {
        witness.push(sig.to_vec());
    }
    witness.push(redeemscript.as_bytes());
    tx.input[0].witness = witness;
    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::{secp256k1::SecretKey, Txid, WPubkeyHash};

    fn test_key(byte: u8) -> (SecretKey, PublicKey) {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[byte; 32]).unwrap();
        let pk = PublicKey::new(bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &sk));
        (sk, pk)
    }

    fn wpkh_script(byte: u8) -> ScriptBuf {
        ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([byte; 20]))
    }

    fn raw_input(txid_byte: u8, vout: u32, value: u64) -> RawTransactionInput {
        RawTransactionInput {
            outpoint: OutPoint {
                txid: Txid::from_byte_array([txid_byte; 32]),
                vout,
            },
            value: Amount::from_sat(value),
            script_pubkey: wpkh_script(txid_byte),
        }
    }

    fn test_contract() -> TradeContract {
        let (_, buyer_pk) = test_key(1);
        let (_, seller_pk) = test_key(2);
        TradeContract {
            trade_id: "offer-42".to_string(),
            amount: Amount::from_sat(100_000_000),
            price: 62_000,
            buyer_security_deposit: Amount::from_sat(10_000_000),
            seller_security_deposit: Amount::from_sat(20_000_000),
            payment_method_id: "SEPA".to_string(),
            maker_is_buyer: false,
            buyer_multisig_pubkey: buyer_pk,
            seller_multisig_pubkey: seller_pk,
            arbitrator_pubkey: None,
            buyer_payout_script: wpkh_script(0xb1),
            seller_payout_script: wpkh_script(0xa1),
        }
    }

    fn test_parties() -> (PartyInputs, PartyInputs) {
        let maker = PartyInputs {
            // maker is seller: owes 120_000_000 + fee share
            inputs: vec![raw_input(0x11, 0, 90_000_000), raw_input(0x12, 1, 40_000_000)],
            change_script: wpkh_script(0xc1),
        };
        let taker = PartyInputs {
            // taker is buyer: owes 10_000_000 + fee share
            inputs: vec![raw_input(0x21, 0, 15_000_000)],
            change_script: wpkh_script(0xc2),
        };
        (maker, taker)
    }

    #[test]
    fn test_escrow_output_value_is_exact() {
        let contract = test_contract();
        let (maker, taker) = test_parties();
        let tx = create_deposit_tx(&contract, &maker, &taker, Amount::from_sat(1000)).unwrap();

        let escrow_index = find_escrow_output(&tx, &contract).unwrap();
        assert_eq!(
            tx.output[escrow_index].value,
            Amount::from_sat(100_000_000 + 10_000_000 + 20_000_000)
        );
        // Change math: maker 130M in, owes 120M + 500 fee; taker 15M in, owes 10M + 500.
        assert_eq!(tx.output[2].value, Amount::from_sat(9_999_500));
        assert_eq!(tx.output[3].value, Amount::from_sat(4_999_500));
    }

    #[test]
    fn test_deposit_tx_is_deterministic_under_input_reordering() {
        let contract = test_contract();
        let (maker, taker) = test_parties();
        let tx1 = create_deposit_tx(&contract, &maker, &taker, Amount::from_sat(1000)).unwrap();

        let mut maker_shuffled = maker.clone();
        maker_shuffled.inputs.reverse();
        let tx2 =
            create_deposit_tx(&contract, &maker_shuffled, &taker, Amount::from_sat(1000)).unwrap();

        assert_eq!(
            bitcoin::consensus::serialize(&tx1),
            bitcoin::consensus::serialize(&tx2)
        );
    }

    #[test]
    fn test_non_segwit_input_rejected_before_assembly() {
        let contract = test_contract();
        let (maker, mut taker) = test_parties();
        taker.inputs[0].script_pubkey =
            ScriptBuf::new_p2pkh(&bitcoin::PubkeyHash::from_byte_array([9; 20]));
        let result = create_deposit_tx(&contract, &maker, &taker, Amount::from_sat(1000));
        assert!(matches!(
            result,
            Err(ContractError::UnsupportedSpendType(op)) if op == taker.inputs[0].outpoint
        ));
    }

    #[test]
    fn test_insufficient_inputs_fail_construction() {
        let contract = test_contract();
        let (mut maker, taker) = test_parties();
        maker.inputs = vec![raw_input(0x11, 0, 1_000_000)];
        let result = create_deposit_tx(&contract, &maker, &taker, Amount::from_sat(1000));
        assert!(matches!(
            result,
            Err(ContractError::InsufficientInputValue { .. })
        ));
    }

    #[test]
    fn test_validate_deposit_tx_catches_tampered_escrow_value() {
        let contract = test_contract();
        let (maker, taker) = test_parties();
        let mut tx = create_deposit_tx(&contract, &maker, &taker, Amount::from_sat(1000)).unwrap();
        assert!(validate_deposit_tx(&tx, &contract, &taker.inputs, &maker.inputs).is_ok());

        let escrow_index = find_escrow_output(&tx, &contract).unwrap();
        tx.output[escrow_index].value = Amount::from_sat(1);
        assert!(matches!(
            validate_deposit_tx(&tx, &contract, &taker.inputs, &maker.inputs),
            Err(ContractError::EscrowValueMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_deposit_tx_catches_foreign_input() {
        let contract = test_contract();
        let (maker, taker) = test_parties();
        let mut tx = create_deposit_tx(&contract, &maker, &taker, Amount::from_sat(1000)).unwrap();
        tx.input[0].previous_output = OutPoint {
            txid: Txid::from_byte_array([0xee; 32]),
            vout: 7,
        };
        assert!(validate_deposit_tx(&tx, &contract, &taker.inputs, &maker.inputs).is_err());
    }

    #[test]
    fn test_multisig_redeemscript_is_order_independent() {
        let (_, pk1) = test_key(1);
        let (_, pk2) = test_key(2);
        let script_a = create_multisig_redeemscript(&pk1, &pk2, None);
        let script_b = create_multisig_redeemscript(&pk2, &pk1, None);
        assert_eq!(script_a, script_b);

        let keys = read_pubkeys_from_multisig_redeemscript(&script_a).unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&pk1) && keys.contains(&pk2));
    }

    #[test]
    fn test_two_of_three_redeemscript_carries_arbitrator() {
        let (_, pk1) = test_key(1);
        let (_, pk2) = test_key(2);
        let (_, arb) = test_key(3);
        let script = create_multisig_redeemscript(&pk1, &pk2, Some(&arb));
        let keys = read_pubkeys_from_multisig_redeemscript(&script).unwrap();
        assert_eq!(keys.len(), 3);
        assert!(keys.contains(&arb));
    }

    #[test]
    fn test_payout_split_and_fee_shares() {
        let contract = test_contract();
        let escrow_outpoint = OutPoint {
            txid: Txid::from_byte_array([0x33; 32]),
            vout: 0,
        };
        let tx = create_payout_tx(&contract, escrow_outpoint, Amount::from_sat(501)).unwrap();
        // Buyer: amount + deposit - 251 (odd sat); seller: deposit - 250.
        assert_eq!(tx.output[0].value, Amount::from_sat(110_000_000 - 251));
        assert_eq!(tx.output[0].script_pubkey, contract.buyer_payout_script);
        assert_eq!(tx.output[1].value, Amount::from_sat(20_000_000 - 250));
        assert_eq!(tx.output[1].script_pubkey, contract.seller_payout_script);

        assert!(validate_payout_tx(&tx, &contract, escrow_outpoint, Amount::from_sat(501)).is_ok());
    }

    #[test]
    fn test_delayed_payout_locktime_must_postdate_confirmation() {
        let contract = test_contract();
        let escrow_outpoint = OutPoint {
            txid: Txid::from_byte_array([0x33; 32]),
            vout: 0,
        };
        let confirm_time: u64 = 1_700_000_000;
        let lock_time = LockTime::from_time((confirm_time + 86_400) as u32).unwrap();
        let tx =
            create_delayed_payout_tx(&contract, escrow_outpoint, Amount::from_sat(500), lock_time)
                .unwrap();

        assert!(validate_delayed_payout_tx(
            &tx,
            &contract,
            escrow_outpoint,
            Amount::from_sat(500),
            confirm_time
        )
        .is_ok());

        // Exactly at the confirmation time is not strictly later.
        assert!(validate_delayed_payout_tx(
            &tx,
            &contract,
            escrow_outpoint,
            Amount::from_sat(500),
            confirm_time + 86_400
        )
        .is_err());
    }

    #[test]
    fn test_delayed_payout_refund_split_verified() {
        let contract = test_contract();
        let escrow_outpoint = OutPoint {
            txid: Txid::from_byte_array([0x33; 32]),
            vout: 0,
        };
        let lock_time = LockTime::from_time(1_700_086_400).unwrap();
        let mut tx =
            create_delayed_payout_tx(&contract, escrow_outpoint, Amount::from_sat(500), lock_time)
                .unwrap();
        // Seller side of the refund carries the trade amount.
        assert_eq!(tx.output[0].script_pubkey, contract.seller_payout_script);
        assert_eq!(tx.output[0].value, Amount::from_sat(120_000_000 - 250));

        tx.output[0].value = Amount::from_sat(1);
        assert!(validate_delayed_payout_tx(
            &tx,
            &contract,
            escrow_outpoint,
            Amount::from_sat(500),
            1_700_000_000
        )
        .is_err());
    }

    #[test]
    fn test_sign_verify_finalize_multisig_spend() {
        let (sk1, pk1) = test_key(1);
        let (sk2, pk2) = test_key(2);
        let contract = test_contract();
        let redeemscript = contract.redeemscript();
        let escrow_value = contract.escrow_value().unwrap();
        let escrow_outpoint = OutPoint {
            txid: Txid::from_byte_array([0x33; 32]),
            vout: 0,
        };
        let tx = create_payout_tx(&contract, escrow_outpoint, Amount::from_sat(500)).unwrap();

        let sig1 = sign_multisig_input(&tx, 0, &redeemscript, escrow_value, &sk1).unwrap();
        let sig2 = sign_multisig_input(&tx, 0, &redeemscript, escrow_value, &sk2).unwrap();

        verify_multisig_signature(&tx, 0, &redeemscript, escrow_value, &sig1, &pk1).unwrap();
        verify_multisig_signature(&tx, 0, &redeemscript, escrow_value, &sig2, &pk2).unwrap();
        // Cross-check: sig1 must not verify under pk2.
        assert!(
            verify_multisig_signature(&tx, 0, &redeemscript, escrow_value, &sig1, &pk2).is_err()
        );

        let finalized =
            finalize_multisig_spend(tx, &redeemscript, &[(pk1, sig1), (pk2, sig2)]).unwrap();
        let witness = &finalized.input[0].witness;
        assert_eq!(witness.len(), 4); // dummy, two sigs, redeemscript
        assert_eq!(witness.last().unwrap(), redeemscript.as_bytes());
    }

    #[test]
    fn test_finalize_rejects_single_signature() {
        let (sk1, pk1) = test_key(1);
        let contract = test_contract();
        let redeemscript = contract.redeemscript();
        let escrow_value = contract.escrow_value().unwrap();
        let tx = create_payout_tx(
            &contract,
            OutPoint {
                txid: Txid::from_byte_array([0x33; 32]),
                vout: 0,
            },
            Amount::from_sat(500),
        )
        .unwrap();
        let sig1 = sign_multisig_input(&tx, 0, &redeemscript, escrow_value, &sk1).unwrap();
        assert!(finalize_multisig_spend(tx, &redeemscript, &[(pk1, sig1)]).is_err());
    }

    #[test]
    fn test_contract_hash_changes_with_terms() {
        let contract = test_contract();
        let hash1 = contract.contract_hash().unwrap();
        let mut changed = contract.clone();
        changed.price += 1;
        assert_ne!(hash1, changed.contract_hash().unwrap());
        // Same terms hash identically.
        assert_eq!(hash1, test_contract().contract_hash().unwrap());
    }
}
