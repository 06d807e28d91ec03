#![no_main]
use arbitrary::Arbitrary;
use cfb_store::CompoundFile;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Op {
    Write { stream: u8, offset: u16, len: u16, byte: u8 },
    SetLen { stream: u8, len: u16 },
    Remove { stream: u8 },
    Rename { stream: u8, to: u8 },
    Persist,
}

fn path(stream: u8) -> String {
    format!("/S{}", stream % 8)
}

fuzz_target!(|ops: Vec<Op>| {
    let mut file = CompoundFile::create().unwrap();
    let mut model: Vec<Option<Vec<u8>>> = vec![None; 8];

    for op in ops.iter().take(64) {
        match *op {
            Op::Write { stream, offset, len, byte } => {
                let index = (stream % 8) as usize;
                let data = vec![byte; len as usize % 6000];
                if model[index].is_none() {
                    file.write_stream(&path(stream), &[]).unwrap();
                    model[index] = Some(Vec::new());
                }
                let offset = offset as usize % 10_000;
                file.open_stream(&path(stream))
                    .unwrap()
                    .write_at(offset as u64, &data)
                    .unwrap();
                if let Some(content) = model[index].as_mut() {
                    if !data.is_empty() {
                        if content.len() < offset + data.len() {
                            content.resize(offset + data.len(), 0);
                        }
                        content[offset..offset + data.len()].copy_from_slice(&data);
                    }
                }
            }
            Op::SetLen { stream, len } => {
                let index = (stream % 8) as usize;
                if let Some(content) = model[index].as_mut() {
                    file.open_stream(&path(stream))
                        .unwrap()
                        .set_len(len as u64)
                        .unwrap();
                    content.resize(len as usize, 0);
                }
            }
            Op::Remove { stream } => {
                let index = (stream % 8) as usize;
                if model[index].take().is_some() {
                    file.remove(&path(stream)).unwrap();
                }
            }
            Op::Rename { stream, to } => {
                let (from, to) = ((stream % 8) as usize, (to % 8) as usize);
                if from != to && model[from].is_some() && model[to].is_none() {
                    file.rename(&path(stream), &format!("S{}", to)).unwrap();
                    model[to] = model[from].take();
                }
            }
            Op::Persist => {
                let bytes = file.to_bytes().unwrap();
                file = CompoundFile::open_bytes(bytes).unwrap();
            }
        }
    }

    let bytes = file.to_bytes().unwrap();
    let reopened = CompoundFile::open_bytes(bytes).unwrap();
    for (index, content) in model.iter().enumerate() {
        match content {
            Some(content) => {
                assert_eq!(&reopened.read_stream(&format!("/S{}", index)).unwrap(), content)
            }
            None => assert!(!reopened.exists(&format!("/S{}", index))),
        }
    }
});
