use simple_pario::{
    AccessMode, FileHandle, IndependentIoSession, Launcher, ParticipantGroup, RecordShape,
};

const PATH: &str = "./datafile.independent";
const GROUP_SIZE: i32 = 4;
const RECORD_LEN: usize = 10;

fn participate(group: ParticipantGroup) {
    let shape = RecordShape::of::<i64>(RECORD_LEN).unwrap();
    let session =
        IndependentIoSession::open(group, PATH, AccessMode::WriteOnly, true, shape).unwrap();

    // Each rank fills its buffer with its own rank value.
    let buffer = vec![group.rank() as i64; RECORD_LEN];
    println!("{} : {:?}", group.rank(), buffer);

    // Only rank 0 actually writes; every other rank performs no I/O at all.
    let outcome = session.write_record(&buffer, |rank| rank == 0).unwrap();
    println!(
        "{} : wrote {} bytes ({:?})",
        group.rank(),
        outcome.bytes_transferred,
        outcome.status
    );

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

    // Waiting on the children is the synchronization point that makes their
    // (absent) writes visible before we read back.
    launcher.wait().unwrap();

    let shape = RecordShape::of::<i64>(RECORD_LEN).unwrap();
    let handle = FileHandle::open(PATH, AccessMode::ReadOnly, false).unwrap();
    let (bytes, _) = handle.read_at(0, shape.size_bytes()).unwrap();
    let values = simple_pario::decode::<i64>(&bytes, RECORD_LEN).unwrap();
    println!("read back rank 0 record: {:?}", values);
    assert_eq!(values, vec![0i64; RECORD_LEN]);
}
