//! End-to-end archive scenarios: write a full archive into a buffer or
//! file, reopen it, and check that every decoded record matches its input.

use anyhow::Result;
use std::io::Cursor;
use tachyon::{
    archive::{ArchiveReader, ArchiveWriter},
    block::{records::BlockRecords, VariantBlock, WriteOptions},
    constants::fixed_stream,
    container::Encryption,
    encryption::Keychain,
    genotype::{GenotypeEncoder, GtMethod},
    header::VariantHeader,
    io::Streamable,
    permutation::PermutationManager,
    record::{FieldValues, FormatField, GenotypeMatrix, GtAllele, InfoField, VariantRecord},
    settings::BlockSettings,
};

fn header_with_samples(n_samples: usize) -> VariantHeader {
    let mut header = VariantHeader::new();
    for sample in 0..n_samples {
        header.add_sample(&format!("HG{sample:05}"));
    }
    header.add_contig("chr20", 64_444_167);
    header.add_contig("chr21", 46_709_983);
    header.add_info("DP");
    header.add_info("AF");
    header.add_format("GQ");
    header.add_filter("PASS");
    header
}

fn diploid(pairs: &[(GtAllele, GtAllele)], phased: bool) -> GenotypeMatrix {
    let mut alleles = Vec::new();
    for (a, b) in pairs {
        alleles.push(*a);
        alleles.push(*b);
    }
    GenotypeMatrix::new(2, vec![phased; pairs.len()], alleles)
}

fn snv(contig_id: i32, position: i64, gt: GenotypeMatrix) -> VariantRecord {
    VariantRecord {
        contig_id,
        position,
        name: format!("rs{position}"),
        reference: "A".into(),
        alternates: vec!["T".into()],
        quality: Some(40.0),
        filter_ids: vec![0],
        info: Vec::new(),
        format: Vec::new(),
        genotypes: Some(gt),
    }
}

/// Scenario 1: a single biallelic diploid site with four samples
#[test]
fn single_site_round_trip() -> Result<()> {
    use GtAllele::*;
    let header = header_with_samples(4);
    let gt = diploid(
        &[
            (Allele(0), Allele(0)),
            (Allele(0), Allele(1)),
            (Allele(1), Allele(1)),
            (Missing, Missing),
        ],
        true,
    );

    let mut manager = PermutationManager::new(4);
    manager.update(&gt);

    let mut block = VariantBlock::new();
    block.set_permutation(&manager);
    let mut encoder = GenotypeEncoder::new(4);
    let record = snv(0, 1_000_000, gt.clone());
    block.add_record(&record, &mut encoder, Some(manager.ppa()))?;

    let mut writer = ArchiveWriter::new(Cursor::new(Vec::new()), &header)?;
    writer.write_block(&mut block, &WriteOptions::default(), None)?;
    let bytes = writer.finalize()?.into_inner();

    let mut reader = ArchiveReader::open(Cursor::new(bytes))?;
    assert_eq!(reader.footer.n_blocks, 1);
    assert_eq!(reader.footer.n_variants, 1);

    let block = reader
        .next_block(&BlockSettings::new(), None)?
        .expect("one block");
    assert!(block.load_failures.is_empty());
    assert!(block.header.has_gt_permuted());

    let records = BlockRecords::new(&block, &header)?;
    let view = records.view(0);
    assert_eq!(view.position(), 1_000_000);
    // The simple SNV packs both alleles into one REFALT byte
    assert!(view.controller().alleles_packed);
    assert_eq!(
        view.alleles().map(|a| a.to_vec()),
        Some(vec!["A".to_string(), "T".to_string()])
    );

    // Biallelic run-length words at byte width; the permutation leaves
    // four singleton runs
    let controller = view.controller();
    assert_eq!(controller.gt_compression_type, u8::from(GtMethod::DiploidRleBiallelic));
    assert_eq!(controller.gt_primitive_type, 0);
    let gt_view = view.gt().expect("genotypes");
    assert_eq!(gt_view.n_runs, 4);
    let lengths: Vec<u64> = gt_view
        .iter_runs()
        .map(|run| run.map(|r| r.length))
        .collect::<std::result::Result<_, _>>()?;
    assert_eq!(lengths.iter().sum::<u64>(), 4);

    // The inverse permutation restores original sample order
    let materialized = gt_view.materialize()?;
    for sample in 0..4 {
        assert_eq!(materialized[sample].0.as_slice(), gt.sample(sample));
    }
    Ok(())
}

/// Scenario 4: a block of biallelic diploid sites over many samples; the
/// permutation must at least halve the genotype stream payload
#[test]
fn permutation_shrinks_genotype_streams() -> Result<()> {
    use GtAllele::*;
    const N_SAMPLES: usize = 2504;
    const N_SITES: usize = 200;

    // Sample classes are interleaved in input order, so unpermuted runs
    // break at nearly every sample
    let class_gt = |class: usize| -> (GtAllele, GtAllele) {
        match class {
            0 => (Allele(0), Allele(0)),
            1 => (Allele(0), Allele(1)),
            _ => (Allele(1), Allele(1)),
        }
    };
    let site = || {
        let pairs: Vec<(GtAllele, GtAllele)> =
            (0..N_SAMPLES).map(|sample| class_gt(sample % 3)).collect();
        diploid(&pairs, true)
    };

    let gt_payload = |permute: bool| -> Result<u64> {
        let header = header_with_samples(N_SAMPLES);
        let mut block = VariantBlock::new();
        let mut encoder = GenotypeEncoder::new(N_SAMPLES as u64);
        let mut manager = PermutationManager::new(N_SAMPLES as u32);
        if permute {
            manager.update(&site());
            block.set_permutation(&manager);
        }
        for position in 0..N_SITES {
            let record = snv(0, 100 + position as i64, site());
            let ppa = permute.then(|| manager.ppa());
            block.add_record(&record, &mut encoder, ppa)?;
        }

        let mut writer = ArchiveWriter::new(Cursor::new(Vec::new()), &header)?;
        writer.write_block(&mut block, &WriteOptions::default(), None)?;
        let bytes = writer.finalize()?.into_inner();

        // Reopen and verify integrity end to end
        let mut reader = ArchiveReader::open(Cursor::new(bytes))?;
        let block = reader
            .next_block(&BlockSettings::new(), None)?
            .expect("one block");
        assert!(block.load_failures.is_empty());

        // FindOverlap over the whole contig returns exactly this block
        let hits = reader.find_overlap(0, 0, 1_000_000_000);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].n_variants as usize, N_SITES);

        let payload: u64 = (fixed_stream::GT_INT8..=fixed_stream::GT_N_INT64)
            .map(|slot| u64::from(block.footer.offsets[slot].data.u_length))
            .sum();
        Ok(payload)
    };

    let unpermuted = gt_payload(false)?;
    let permuted = gt_payload(true)?;
    assert!(
        permuted * 2 <= unpermuted,
        "permuted {permuted} bytes vs unpermuted {unpermuted}"
    );
    Ok(())
}

/// Scenario 5: an encrypted INFO stream of floats is unreadable without its
/// keychain entry and intact afterwards
#[test]
fn encrypted_stream_requires_its_key() -> Result<()> {
    use GtAllele::*;
    let header = header_with_samples(2);
    let keychain = Keychain::new();

    let mut block = VariantBlock::new();
    let mut encoder = GenotypeEncoder::new(2);
    for position in 0..1000i64 {
        let mut record = snv(0, 100 + position, diploid(&[(Allele(0), Allele(0)), (Allele(0), Allele(1))], true));
        record.info = vec![InfoField {
            global_id: 1,
            values: FieldValues::Float(vec![position as f32 * 0.001]),
        }];
        block.add_record(&record, &mut encoder, None)?;
    }

    let options = WriteOptions {
        encryption: Encryption::AesGcm256,
        textual_names: false,
    };
    let mut writer = ArchiveWriter::new(Cursor::new(Vec::new()), &header)?;
    writer.write_block(&mut block, &options, Some(&keychain))?;
    let bytes = writer.finalize()?.into_inner();
    assert!(keychain.len() > 0);

    // Drop one keychain entry: that stream alone fails with an auth error
    let mut reader = ArchiveReader::open(Cursor::new(bytes.clone()))?;
    let entry = reader.find_overlap(0, 0, i64::MAX)[0];
    let settings = BlockSettings::new();
    let probe = reader.read_block(&entry, &settings, Some(&keychain))?;
    assert!(probe.load_failures.is_empty());
    let info_id = probe.footer.info_offsets[0].identifier;

    let removed = keychain.remove(info_id).expect("keychain entry");
    let damaged = reader.read_block(&entry, &settings, Some(&keychain))?;
    assert_eq!(damaged.load_failures.len(), 1);
    assert!(matches!(
        damaged.load_failures[0].error,
        tachyon::block::BlockError::Crypto(tachyon::encryption::CryptoError::MissingKey(_))
    ));

    // Restore the entry: the stream decodes and its digest verifies
    keychain.insert(removed);
    let restored = reader.read_block(&entry, &settings, Some(&keychain))?;
    assert!(restored.load_failures.is_empty());
    let records = BlockRecords::new(&restored, &header)?;
    assert_eq!(
        records.view(500).info_value(1),
        Some(FieldValues::Float(vec![500f32 * 0.001]))
    );
    Ok(())
}

/// Multi-block archives resolve range queries through the index and decode
/// every field back to its input value
#[test]
fn multi_block_archive_round_trip() -> Result<()> {
    use GtAllele::*;
    let header = header_with_samples(3);
    let mut writer = ArchiveWriter::new(Cursor::new(Vec::new()), &header)?;

    let make_block = |contig_id: i32, base: i64| -> Result<VariantBlock> {
        let mut block = VariantBlock::new();
        let mut encoder = GenotypeEncoder::new(3);
        for site in 0..50i64 {
            let position = base + site * 10;
            let mut record = snv(
                contig_id,
                position,
                diploid(
                    &[
                        (Allele(0), Allele(0)),
                        (Allele(0), Allele(1)),
                        (Allele(1), Allele(1)),
                    ],
                    false,
                ),
            );
            record.info = vec![InfoField {
                global_id: 0,
                values: FieldValues::Int(vec![position as i32 % 97]),
            }];
            record.format = vec![FormatField {
                global_id: 0,
                per_sample: 1,
                values: FieldValues::Int(vec![30, 40, 50]),
            }];
            block.add_record(&record, &mut encoder, None)?;
        }
        Ok(block)
    };

    let mut blocks = vec![
        make_block(0, 1000)?,
        make_block(0, 2000)?,
        make_block(1, 500)?,
    ];
    for block in &mut blocks {
        writer.write_block(block, &WriteOptions::default(), None)?;
    }
    // The writer tallies bytes per stream family as it goes; positions
    // narrow to two bytes in these blocks
    let position_cost = writer.stats().base[fixed_stream::POSITION];
    assert_eq!(position_cost.n_bytes_uncompressed, 150 * 2);
    assert!(writer.stats().info.n_bytes_uncompressed > 0);
    let bytes = writer.finalize()?.into_inner();

    let mut reader = ArchiveReader::open(Cursor::new(bytes))?;
    assert_eq!(reader.footer.n_blocks, 3);
    assert_eq!(reader.footer.n_variants, 150);

    // Contig 0 holds blocks [1000,1490] and [2000,2490]; a query between
    // them touches only the second
    let hits = reader.find_overlap(0, 1990, 2050);
    let ids: Vec<u32> = hits.iter().map(|entry| entry.block_id).collect();
    assert_eq!(ids, vec![1]);
    let hits = reader.find_overlap(0, 1400, 2050);
    let ids: Vec<u32> = hits.iter().map(|entry| entry.block_id).collect();
    assert_eq!(ids, vec![0, 1]);
    let hits = reader.find_overlap(1, 0, 10_000);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].block_id, 2);

    // Decode the contig-1 block through the index entry and check fields
    let entry = hits[0];
    let block = reader.read_block(&entry, &BlockSettings::new(), None)?;
    assert!(block.load_failures.is_empty());
    let records = BlockRecords::new(&block, &header)?;
    assert_eq!(records.len(), 50);
    for (site, view) in records.iter().enumerate() {
        let position = 500 + site as i64 * 10;
        assert_eq!(view.position(), position);
        assert_eq!(view.contig_id(), 1);
        assert_eq!(view.name(), Some(format!("rs{position}").as_str()));
        assert_eq!(view.quality(), Some(40.0));
        assert_eq!(view.filter_ids(), Some(&[0][..]));
        assert_eq!(
            view.info_value(0),
            Some(FieldValues::Int(vec![position as i32 % 97]))
        );
        assert_eq!(
            view.format_value(0),
            Some(FieldValues::Int(vec![30, 40, 50]))
        );
        let gt = view.gt().expect("genotypes");
        let materialized = gt.materialize()?;
        assert_eq!(materialized[0].0, vec![Allele(0), Allele(0)]);
        assert_eq!(materialized[1].0, vec![Allele(0), Allele(1)]);
        assert_eq!(materialized[2].0, vec![Allele(1), Allele(1)]);
    }

    // Streaming visits all three blocks in emission order
    reader.rewind()?;
    let mut n_streamed = 0;
    while let Some(block) = reader.next_block(&BlockSettings::minimum(), None)? {
        assert!(block.load_failures.is_empty());
        n_streamed += 1;
    }
    assert_eq!(n_streamed, 3);
    Ok(())
}

/// Mixed-shape sites survive the round trip: triallelic, EOV-padded and
/// genotype-free records in one block
#[test]
fn mixed_site_shapes_round_trip() -> Result<()> {
    use GtAllele::*;
    let header = header_with_samples(3);

    let triallelic = VariantRecord {
        contig_id: 0,
        position: 5000,
        name: "tri".into(),
        reference: "G".into(),
        alternates: vec!["C".into(), "GT".into()],
        quality: Some(11.0),
        filter_ids: vec![0],
        info: Vec::new(),
        format: Vec::new(),
        genotypes: Some(diploid(
            &[
                (Allele(0), Allele(1)),
                (Allele(1), Allele(2)),
                (Allele(2), Allele(2)),
            ],
            false,
        )),
    };
    let haploid_padded = VariantRecord {
        contig_id: 0,
        position: 5100,
        name: "chrY-like".into(),
        reference: "A".into(),
        alternates: vec!["G".into()],
        quality: None,
        filter_ids: Vec::new(),
        info: Vec::new(),
        format: Vec::new(),
        genotypes: Some(diploid(
            &[(Allele(0), Eov), (Allele(1), Eov), (Missing, Eov)],
            false,
        )),
    };
    let no_gt = VariantRecord {
        contig_id: 0,
        position: 5200,
        name: "sv1".into(),
        reference: "A".into(),
        alternates: vec!["<NON_REF>".into()],
        quality: Some(99.0),
        filter_ids: Vec::new(),
        info: Vec::new(),
        format: Vec::new(),
        genotypes: None,
    };

    let mut block = VariantBlock::new();
    let mut encoder = GenotypeEncoder::new(3);
    block.add_record(&triallelic, &mut encoder, None)?;
    block.add_record(&haploid_padded, &mut encoder, None)?;
    block.add_record(&no_gt, &mut encoder, None)?;

    let mut writer = ArchiveWriter::new(Cursor::new(Vec::new()), &header)?;
    writer.write_block(&mut block, &WriteOptions::default(), None)?;
    let bytes = writer.finalize()?.into_inner();

    let mut reader = ArchiveReader::open(Cursor::new(bytes))?;
    let block = reader
        .next_block(&BlockSettings::new(), None)?
        .expect("one block");
    assert!(block.load_failures.is_empty());
    let records = BlockRecords::new(&block, &header)?;

    let tri = records.view(0);
    assert_eq!(
        tri.alleles().map(|a| a.to_vec()),
        Some(vec!["G".to_string(), "C".to_string(), "GT".to_string()])
    );
    assert_eq!(
        tri.controller().gt_compression_type,
        u8::from(GtMethod::DiploidRleNallelic)
    );
    let gt = tri.gt().expect("triallelic genotypes");
    let materialized = gt.materialize()?;
    assert_eq!(materialized[1].0, vec![Allele(1), Allele(2)]);

    // The EOV-padded site rides the n-ploid codec with sentinel second
    // slots
    let padded = records.view(1);
    assert_eq!(
        padded.controller().gt_compression_type,
        u8::from(GtMethod::NploidRle)
    );
    assert!(padded.controller().gt_mixed_ploidy);
    let gt = padded.gt().expect("padded genotypes");
    let materialized = gt.materialize()?;
    assert_eq!(materialized[0].0, vec![Allele(0), Eov]);
    assert_eq!(materialized[2].0, vec![Missing, Eov]);

    let plain = records.view(2);
    assert!(plain.gt().is_none());
    assert_eq!(plain.quality(), Some(99.0));
    assert_eq!(
        plain.alleles().map(|a| a.to_vec()),
        Some(vec!["A".to_string(), "<NON_REF>".to_string()])
    );
    Ok(())
}

/// Archives and keychains survive a real file on disk
#[test]
fn on_disk_archive_with_keychain() -> Result<()> {
    use GtAllele::*;
    use std::fs::File;

    let dir = tempfile::tempdir()?;
    let archive_path = dir.path().join("cohort.yon");
    let keychain_path = dir.path().join("cohort.kyon");

    let header = header_with_samples(2);
    let keychain = Keychain::new();

    let mut block = VariantBlock::new();
    let mut encoder = GenotypeEncoder::new(2);
    for position in 0..100i64 {
        let record = snv(
            0,
            1000 + position,
            diploid(&[(Allele(0), Allele(1)), (Allele(1), Allele(1))], true),
        );
        block.add_record(&record, &mut encoder, None)?;
    }

    let options = WriteOptions {
        encryption: Encryption::AesGcm256,
        textual_names: false,
    };
    let file = File::create(&archive_path)?;
    let mut writer = ArchiveWriter::new(file, &header)?;
    writer.write_block(&mut block, &options, Some(&keychain))?;
    writer.finalize()?;

    // The keychain travels in its own file
    let mut keychain_file = File::create(&keychain_path)?;
    keychain.write_bytes(&mut keychain_file)?;

    let mut loaded_keychain_file = File::open(&keychain_path)?;
    let loaded_keychain = Keychain::read_bytes(&mut loaded_keychain_file)?;
    assert_eq!(loaded_keychain.len(), keychain.len());

    let mut reader = ArchiveReader::open(File::open(&archive_path)?)?;
    let block = reader
        .next_block(&BlockSettings::new(), Some(&loaded_keychain))?
        .expect("one block");
    assert!(block.load_failures.is_empty());
    let records = BlockRecords::new(&block, &header)?;
    assert_eq!(records.len(), 100);
    assert_eq!(records.view(42).position(), 1042);
    Ok(())
}
