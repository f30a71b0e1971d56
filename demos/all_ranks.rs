use simple_pario::{
    AccessMode, FileHandle, IndependentIoSession, Launcher, ParticipantGroup, RecordShape,
};

const PATH: &str = "./datafile.allranks";
const GROUP_SIZE: i32 = 4;
const RECORD_LEN: usize = 8;

fn participate(group: ParticipantGroup) {
    let shape = RecordShape::of::<f64>(RECORD_LEN).unwrap();
    let session =
        IndependentIoSession::open(group, PATH, AccessMode::ReadWrite, true, shape).unwrap();

    // Every rank writes its own record concurrently, with no coordination:
    // the rank-derived byte ranges are disjoint, so no locking is needed.
    let buffer: Vec<f64> = (0..RECORD_LEN)
        .map(|i| group.rank() as f64 + i as f64 / 10.0)
        .collect();
    session.write_record(&buffer, |_rank| true).unwrap();

    // Each rank can immediately read back its own range.
    let (read_back, _) = session.read_record::<f64>(|_rank| true).unwrap();
    assert_eq!(read_back, buffer);
    println!("{} : verified own record", group.rank());

    session.close().unwrap();
}

fn main() {
    env_logger::init();

    if ParticipantGroup::is_spawned() {
        participate(ParticipantGroup::from_env().unwrap());
        return;
    }

    let (group, launcher) = Launcher::spawn_group(GROUP_SIZE).unwrap();
    participate(group);
    launcher.wait().unwrap();

    // After all participants have exited, the whole file parses with nothing
    // but the group size and record shape.
    let shape = RecordShape::of::<f64>(RECORD_LEN).unwrap();
    let handle = FileHandle::open(PATH, AccessMode::ReadOnly, false).unwrap();
    for rank in 0..GROUP_SIZE {
        let range = simple_pario::record_range(rank, GROUP_SIZE, shape.size_bytes() as i64).unwrap();
        let (bytes, _) = handle.read_at(range.offset, range.size as usize).unwrap();
        let values = simple_pario::decode::<f64>(&bytes, RECORD_LEN).unwrap();
        assert_eq!(values[0], rank as f64);
        println!("rank {} record: {:?}", rank, values);
    }
}
