use knob_crypto::aont::fold_block_hashes;
use knob_crypto::{
    decrypt, decrypt_blocks, encrypt, encrypt_blocks, generate_file_key, generate_group_key,
    open_session_key, revoke, CustodianPrivateKey, EncryptOptions,
};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

fn custodian() -> CustodianPrivateKey {
    CustodianPrivateKey::generate(2048).expect("RSA key generation")
}

#[divan::bench(args = [65536, 1048576, 16777216])]
fn bench_layer1_encrypt(bencher: divan::Bencher, size: usize) {
    let file_key = generate_file_key();
    let iv = [0x5Au8; 16];
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| encrypt_blocks(divan::black_box(&data), file_key.as_bytes(), &iv));
}

#[divan::bench(args = [65536, 1048576, 16777216])]
fn bench_layer1_decrypt(bencher: divan::Bencher, size: usize) {
    let file_key = generate_file_key();
    let iv = [0x5Au8; 16];
    let blocks = encrypt_blocks(&make_data(size), file_key.as_bytes(), &iv);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            decrypt_blocks(divan::black_box(&blocks), file_key.as_bytes(), &iv, size as u64).unwrap()
        });
}

#[divan::bench(args = [65536, 1048576, 16777216])]
fn bench_aont_fold(bencher: divan::Bencher, size: usize) {
    let file_key = generate_file_key();
    let blocks = encrypt_blocks(&make_data(size), file_key.as_bytes(), &[0u8; 16]);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| fold_block_hashes(divan::black_box(&blocks)));
}

#[divan::bench(args = [1048576])]
fn bench_pipeline_roundtrip(bencher: divan::Bencher, size: usize) {
    let custodian = custodian();
    let public = custodian.public_key();
    let gk = generate_group_key();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let sealed = encrypt(divan::black_box(&data), &gk, &public, EncryptOptions::default()).unwrap();
            decrypt(&sealed.ciphertext, &sealed.bundle, &gk, &custodian).unwrap()
        });
}

/// Revocation cost should stay flat as the file grows.
#[divan::bench(args = [65536, 16777216])]
fn bench_revoke(bencher: divan::Bencher, size: usize) {
    let custodian = custodian();
    let gk1 = generate_group_key();
    let gk2 = generate_group_key();
    let sealed = encrypt(&make_data(size), &gk1, &custodian.public_key(), EncryptOptions::default()).unwrap();
    let sk = open_session_key(&sealed.bundle, &custodian).unwrap();
    bencher.bench(|| {
        revoke(
            divan::black_box(&sealed.ciphertext),
            &gk1,
            &gk2,
            &sealed.bundle.meta_index,
            &sk,
        )
        .unwrap()
    });
}

fn main() {
    divan::main();
}
