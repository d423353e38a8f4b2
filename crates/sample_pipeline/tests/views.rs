//! View behaviour over the integer test dataset.
//!
//! Tests cover:
//! - ListView indexing, negative indices and slicing
//! - Payload transforms and meta passthrough
//! - IteratorView passes, restarts and infinite mode
//! - BatchView sizes, layouts, randomization and pumping
//! - ListView and IteratorView agreeing on the order of one pass

mod common;
use common::Numbers;

use anyhow::Result;
use sample_pipeline::{
    Batch, BatchOptions, CacheMode, Data, DataOptions, FnTransform, Layout, Payload,
    PipelineError, Pipeline, Record, Split, ViewOptions,
};

fn data() -> Result<Data> {
    Data::new(
        Numbers::new(),
        Pipeline::default(),
        None,
        DataOptions::builder().cache(CacheMode::Mem).build(),
    )
}

fn xs(records: &[Record]) -> Vec<i64> {
    records.iter().map(|r| r.x.as_i64().unwrap()).collect()
}

fn batch_xs(batch: &Batch) -> Vec<i64> {
    match batch {
        Batch::Tuples(records) => xs(records),
        Batch::Lists { xs, .. } => xs.iter().map(|x| x.as_i64().unwrap()).collect(),
        Batch::Arrays { xs, .. } => xs.to_vec::<i64>().unwrap(),
    }
}

fn out_of_range(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::IndexOutOfRange { .. })
    )
}

// ================================================================================================
// 1. ListView
// ================================================================================================
#[test]
fn test_list_view_indexing() -> Result<()> {
    let data = data()?;
    let list = data.lazy_list(Split::Train, ViewOptions::default())?;

    assert_eq!(list.len(), 100);
    assert_eq!(list.get(0)?.x.as_i64(), Some(0));
    assert_eq!(list.get(0)?.y.as_i64(), Some(5));
    assert_eq!(list.get(-1)?.x.as_i64(), Some(99));
    assert_eq!(list.get(-100)?.x.as_i64(), Some(0));

    assert!(out_of_range(&list.get(100).unwrap_err()));
    assert!(out_of_range(&list.get(-101).unwrap_err()));
    Ok(())
}

#[test]
fn test_list_view_slices() -> Result<()> {
    let data = data()?;
    let list = data.lazy_list(Split::Val, ViewOptions::default())?;

    assert_eq!(xs(&list.slice(Some(2), Some(5))?), vec![2, 3, 4]);
    assert_eq!(xs(&list.slice(None, Some(-1))?), (0..9).collect::<Vec<_>>());
    assert_eq!(xs(&list.slice(Some(-3), None)?), vec![7, 8, 9]);
    assert_eq!(xs(&list.slice(None, None)?), (0..10).collect::<Vec<_>>());
    assert!(list.slice(Some(5), Some(3))?.is_empty());

    assert!(out_of_range(&list.slice(Some(10), None).unwrap_err()));
    assert!(out_of_range(&list.slice(None, Some(11)).unwrap_err()));
    assert!(out_of_range(&list.slice(Some(-11), None).unwrap_err()));
    Ok(())
}

#[test]
fn test_list_view_transforms_and_meta() -> Result<()> {
    let data = data()?;
    let options = ViewOptions::builder()
        .transform_x(FnTransform(|x: Payload| -> Result<Payload> {
            Ok((x.as_i64().unwrap_or_default() + 10).into())
        }))
        .with_meta(true)
        .build();
    let list = data.lazy_list(Split::Test, options)?;

    let record = list.get(3)?;
    assert_eq!(record.x.as_i64(), Some(13));
    assert_eq!(record.y.as_i64(), Some(8));
    assert_eq!(record.meta.as_ref().map(|m| m["meta"].clone()), Some(3.into()));

    let plain = data.lazy_list(Split::Test, ViewOptions::default())?;
    assert!(plain.get(3)?.meta.is_none());
    Ok(())
}

#[test]
fn test_list_view_randomized_order() -> Result<()> {
    let data = data()?;
    let sequential = data.lazy_list(Split::Train, ViewOptions::default())?;
    let seeded = |seed| -> Result<Vec<i64>> {
        let options = ViewOptions::builder().randomize(true).random_seed(seed).build();
        Ok(xs(&data.lazy_list(Split::Train, options)?.to_vec()?))
    };

    let first = seeded(2204)?;
    let mut sorted = first.clone();
    sorted.sort();
    assert_eq!(sorted, (0..100).collect::<Vec<_>>());
    assert_ne!(first, xs(&sequential.to_vec()?));
    assert_eq!(first, seeded(2204)?);
    assert_ne!(first, seeded(1)?);

    // the view order is fixed, so single reads agree with the bulk read
    let options = ViewOptions::builder().randomize(true).build();
    let list = data.lazy_list(Split::Train, options)?;
    let singles = list.iter().collect::<Result<Vec<_>>>()?;
    assert_eq!(xs(&singles), first);
    Ok(())
}

#[test]
fn test_list_view_max_samples() -> Result<()> {
    let data = data()?;
    let list = data.lazy_list(Split::Train, ViewOptions::builder().max_samples(7).build())?;
    assert_eq!(list.len(), 7);
    assert_eq!(xs(&list.to_vec()?), (0..7).collect::<Vec<_>>());
    assert!(out_of_range(&list.get(7).unwrap_err()));
    Ok(())
}

// ================================================================================================
// 2. IteratorView
// ================================================================================================
#[test]
fn test_iterator_view_infinite_wraps_around() -> Result<()> {
    let data = data()?;
    let options = ViewOptions::builder().infinite(true).build();
    let records = data
        .iter(Split::Train, options)?
        .take(150)
        .collect::<Result<Vec<_>>>()?;

    let expected: Vec<i64> = (0..100).chain(0..50).collect();
    assert_eq!(xs(&records), expected);
    Ok(())
}

#[test]
fn test_iterator_view_finite_passes() -> Result<()> {
    let data = data()?;
    let mut iter = data.iter(Split::Val, ViewOptions::default())?;

    let first = iter.by_ref().collect::<Result<Vec<_>>>()?;
    assert_eq!(xs(&first), (0..10).collect::<Vec<_>>());
    assert_eq!(iter.epoch(), 1);

    // a finished view can be iterated again
    let second = iter.by_ref().collect::<Result<Vec<_>>>()?;
    assert_eq!(xs(&second), xs(&first));
    Ok(())
}

#[test]
fn test_iterator_view_reshuffles_each_pass() -> Result<()> {
    let data = data()?;
    let options = ViewOptions::builder().randomize(true).fetch_size(1).build();
    let mut iter = data.iter(Split::Train, options)?;

    let first = xs(&iter.by_ref().collect::<Result<Vec<_>>>()?);
    let second = xs(&iter.by_ref().collect::<Result<Vec<_>>>()?);
    assert_eq!(first.len(), 100);
    assert_ne!(first, second);

    let mut sorted = second.clone();
    sorted.sort();
    assert_eq!(sorted, (0..100).collect::<Vec<_>>());
    Ok(())
}

// ================================================================================================
// 3. BatchView
// ================================================================================================
#[test]
fn test_batch_view_serial() -> Result<()> {
    let data = data()?;
    let batches = data
        .batches(
            Split::Train,
            ViewOptions::default(),
            BatchOptions::default().batch_size(10),
        )?
        .collect::<Result<Vec<_>>>()?;

    assert_eq!(batches.len(), 10);
    assert!(batches.iter().all(|b| b.len() == 10));
    let all: Vec<i64> = batches.iter().flat_map(batch_xs).collect();
    assert_eq!(all, (0..100).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_batch_view_drops_partial_batch() -> Result<()> {
    let data = data()?;
    let view = data.batches(
        Split::Test,
        ViewOptions::default(),
        BatchOptions::default().batch_size(8),
    )?;
    assert_eq!(view.len(), 2);
    assert_eq!(view.count(), 2);
    Ok(())
}

#[test]
fn test_batch_view_infinite_wraps() -> Result<()> {
    let data = data()?;
    let options = ViewOptions::builder().infinite(true).build();
    let batches = data
        .batches(Split::Val, options, BatchOptions::default().batch_size(4))?
        .take(5)
        .collect::<Result<Vec<_>>>()?;

    let got: Vec<Vec<i64>> = batches.iter().map(batch_xs).collect();
    assert_eq!(
        got,
        vec![
            vec![0, 1, 2, 3],
            vec![4, 5, 6, 7],
            vec![8, 9, 0, 1],
            vec![2, 3, 4, 5],
            vec![6, 7, 8, 9],
        ]
    );
    Ok(())
}

#[test]
fn test_batch_view_layouts() -> Result<()> {
    let data = data()?;
    let options = ViewOptions::builder()
        .layout(Layout::Arrays)
        .with_meta(true)
        .build();
    let mut view = data.batches(Split::Val, options, BatchOptions::default().batch_size(5))?;

    let batch = view.next().unwrap()?;
    let Batch::Arrays { xs, ys, metas } = batch else {
        panic!("expected an arrays batch");
    };
    assert_eq!(xs.shape().to_vec(), vec![5]);
    assert_eq!(ys.to_vec::<i64>()?, vec![5, 6, 7, 8, 9]);
    assert_eq!(metas.map(|m| m.len()), Some(5));
    Ok(())
}

#[test]
fn test_batch_view_randomized_covers_each_sample_once() -> Result<()> {
    let data = data()?;
    let options = ViewOptions::builder().randomize(true).fetch_size(8).build();
    let batches = data
        .batches(Split::Train, options, BatchOptions::default().batch_size(10))?
        .collect::<Result<Vec<_>>>()?;

    assert_eq!(batches.len(), 10);
    let mut all: Vec<i64> = batches.iter().flat_map(batch_xs).collect();
    assert_ne!(all, (0..100).collect::<Vec<_>>());
    all.sort();
    assert_eq!(all, (0..100).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_batch_view_pumped_matches_unpumped() -> Result<()> {
    let data = data()?;
    let options = || ViewOptions::builder().randomize(true).infinite(true).fetch_size(3).build();

    let pumped = data
        .batches(Split::Train, options(), BatchOptions::default().batch_size(7).max_pumped(2))?
        .take(40)
        .collect::<Result<Vec<_>>>()?;
    let direct = data
        .batches(Split::Train, options(), BatchOptions::default().batch_size(7).pump(false))?
        .take(40)
        .collect::<Result<Vec<_>>>()?;

    assert_eq!(pumped, direct);
    Ok(())
}

#[test]
fn test_dropping_a_batch_view_keeps_other_pumps() -> Result<()> {
    let data = data()?;
    let options = || ViewOptions::builder().randomize(true).infinite(true).fetch_size(5).build();
    let expected = data
        .batches(Split::Train, options(), BatchOptions::default().batch_size(10).pump(false))?
        .take(25)
        .map(|b| b.map(|b| batch_xs(&b)))
        .collect::<Result<Vec<_>>>()?;

    let older = data.batches(Split::Train, options(), BatchOptions::default().batch_size(10))?;
    let mut newer = data.batches(Split::Train, options(), BatchOptions::default().batch_size(10))?;
    assert_eq!(batch_xs(&newer.next().unwrap()?), expected[0]);
    drop(older);

    let rest = newer
        .take(24)
        .map(|b| b.map(|b| batch_xs(&b)))
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(rest, expected[1..]);
    Ok(())
}

#[test]
fn test_interleaved_batch_views_on_one_split() -> Result<()> {
    let data = data()?;
    let view = |fetch_size, batch_size, pump| {
        let options = ViewOptions::builder()
            .randomize(true)
            .infinite(true)
            .fetch_size(fetch_size)
            .build();
        data.batches(
            Split::Train,
            options,
            BatchOptions::default().batch_size(batch_size).pump(pump).max_pumped(3),
        )
    };

    let mut a = view(4, 8, true)?;
    let mut b = view(7, 5, true)?;
    let mut a_direct = view(4, 8, false)?;
    let mut b_direct = view(7, 5, false)?;
    for _ in 0..30 {
        assert_eq!(a.next().unwrap()?, a_direct.next().unwrap()?);
        assert_eq!(b.next().unwrap()?, b_direct.next().unwrap()?);
    }
    Ok(())
}

#[test]
fn test_batch_view_rejects_zero_batch_size() -> Result<()> {
    let data = data()?;
    let result = data.batches(
        Split::Train,
        ViewOptions::default(),
        BatchOptions::default().batch_size(0),
    );
    assert!(result.is_err());
    Ok(())
}

// ================================================================================================
// 4. Cross-view agreement
// ================================================================================================
#[test]
fn test_list_and_iterator_views_agree() -> Result<()> {
    let data = data()?;
    let configs = [
        ViewOptions::default(),
        ViewOptions::builder().randomize(true).random_seed(31).fetch_size(4).build(),
        ViewOptions::builder().randomize(true).random_seed(31).fetch_size(1).build(),
    ];

    for options in configs {
        let listed = xs(&data.lazy_list(Split::Train, options.clone())?.to_vec()?);
        let iterated = data
            .iter(Split::Train, options)?
            .collect::<Result<Vec<_>>>()?;
        assert_eq!(listed.len(), 100);
        assert_eq!(listed, xs(&iterated));
    }
    Ok(())
}
